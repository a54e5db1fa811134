//! Decode-session capability scaffold.
//!
//! The source ships a companion decode path used by the settings preview;
//! wire-format decoding itself is out of scope here (see SPEC_FULL.md
//! §4.2.1). Only the capability contract is carried, so pipeline wiring
//! code has a stable seam to plug a real decoder into later.

/// Opaque identifier for a registered output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// A still-undecoded sample handed to [`DecodeSession::submit_sample`].
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
}

/// A decoded sample ready for display.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub buffer: BufferId,
    pub presentation_time_us: i64,
}

/// Errors a [`DecodeSession`] implementation may surface.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),
    #[error("hardware failure: {0}")]
    HardwareFailure(String),
    #[error("buffer {0:?} was never registered")]
    UnknownBuffer(BufferId),
}

/// Capability set for decoding a previously encoded AVC stream back to a
/// displayable surface. No implementation ships in this workspace; a mock
/// backs pipeline-wiring tests.
pub trait DecodeSession: Send {
    fn drm_format_modifiers(&self) -> &[u64];
    fn reset(&mut self);
    fn register_buffer(&mut self, width: u32, height: u32) -> Result<BufferId, DecodeError>;
    fn unregister_buffer(&mut self, id: BufferId);
    fn sample_buffer(&mut self) -> Option<SampleBuffer>;
    fn submit_sample(&mut self, sample: EncodedSample) -> Result<(), DecodeError>;
    fn n_pending_frames(&self) -> usize;
    fn decode_frame(&mut self, sample: EncodedSample) -> Result<BufferId, DecodeError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct MockDecodeSession {
        next_id: u32,
        registered: Vec<BufferId>,
        pending: VecDeque<EncodedSample>,
    }

    impl DecodeSession for MockDecodeSession {
        fn drm_format_modifiers(&self) -> &[u64] {
            &[0]
        }

        fn reset(&mut self) {
            self.pending.clear();
        }

        fn register_buffer(&mut self, _width: u32, _height: u32) -> Result<BufferId, DecodeError> {
            let id = BufferId(self.next_id);
            self.next_id += 1;
            self.registered.push(id);
            Ok(id)
        }

        fn unregister_buffer(&mut self, id: BufferId) {
            self.registered.retain(|&b| b != id);
        }

        fn sample_buffer(&mut self) -> Option<SampleBuffer> {
            self.pending.pop_front().map(|s| SampleBuffer {
                buffer: BufferId(0),
                presentation_time_us: s.presentation_time_us,
            })
        }

        fn submit_sample(&mut self, sample: EncodedSample) -> Result<(), DecodeError> {
            self.pending.push_back(sample);
            Ok(())
        }

        fn n_pending_frames(&self) -> usize {
            self.pending.len()
        }

        fn decode_frame(&mut self, sample: EncodedSample) -> Result<BufferId, DecodeError> {
            self.submit_sample(sample)?;
            self.registered.first().copied().ok_or_else(|| DecodeError::UnknownBuffer(BufferId(0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDecodeSession;
    use super::*;

    #[test]
    fn register_and_unregister_round_trip() {
        let mut session = MockDecodeSession::default();
        let id = session.register_buffer(1920, 1080).unwrap();
        assert_eq!(session.n_pending_frames(), 0);
        session.unregister_buffer(id);
    }

    #[test]
    fn submit_then_drain_sample_buffer() {
        let mut session = MockDecodeSession::default();
        session
            .submit_sample(EncodedSample {
                data: vec![0, 1, 2],
                presentation_time_us: 42,
            })
            .unwrap();
        assert_eq!(session.n_pending_frames(), 1);

        let sample = session.sample_buffer().unwrap();
        assert_eq!(sample.presentation_time_us, 42);
        assert_eq!(session.n_pending_frames(), 0);
    }
}
