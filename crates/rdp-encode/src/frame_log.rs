//! Tracks which submitted frames are still outstanding, and derives
//! encode/ack rates from a one-second sliding window of timestamps.

use std::collections::{HashSet, VecDeque};

const RATE_WINDOW_US: i64 = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct FrameTime {
    frame_id: u32,
    time_us: i64,
}

/// Two time-stamped queues ("encoded", "acknowledged") plus a set of
/// in-flight frame ids, matching `GrdRdpGfxFrameLog`.
#[derive(Debug, Default)]
pub struct FrameLog {
    encoded_frames: VecDeque<FrameTime>,
    acked_frames: VecDeque<FrameTime>,
    tracked_frames: HashSet<u32>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `frame_id` was submitted for encoding at `time_us`.
    pub fn track_frame(&mut self, frame_id: u32, time_us: i64) {
        self.encoded_frames.push_back(FrameTime { frame_id, time_us });
        self.tracked_frames.insert(frame_id);
    }

    /// Records an acknowledgement for `frame_id`, if it was tracked.
    /// Unknown ids (already cleared, or never tracked) are ignored.
    pub fn ack_tracked_frame(&mut self, frame_id: u32, time_us: i64) {
        if !self.tracked_frames.remove(&frame_id) {
            return;
        }
        self.acked_frames.push_back(FrameTime { frame_id, time_us });
    }

    /// Undoes the most recent ack, re-tracking the frame. Used when a
    /// pipeline rewrite requires treating the last-acked frame as unacked
    /// again. Panics if the tail entry doesn't match `frame_id`/`time_us`,
    /// mirroring the source's `g_assert`.
    pub fn unack_last_acked_frame(&mut self, frame_id: u32, time_us: i64) {
        let last = self.acked_frames.pop_back().expect("no acked frame to unack");
        assert_eq!(last.frame_id, frame_id);
        assert_eq!(last.time_us, time_us);
        self.tracked_frames.insert(frame_id);
    }

    fn evict_old(queue: &mut VecDeque<FrameTime>, now_us: i64) {
        while let Some(front) = queue.front() {
            if now_us - front.time_us >= RATE_WINDOW_US {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evicts entries older than one second and returns `(enc_rate,
    /// ack_rate)`: the number of entries remaining in each queue, which —
    /// since every remaining entry is younger than one second — equals the
    /// per-second rate.
    pub fn update_rates(&mut self, now_us: i64) -> (u32, u32) {
        Self::evict_old(&mut self.encoded_frames, now_us);
        Self::evict_old(&mut self.acked_frames, now_us);
        (self.encoded_frames.len() as u32, self.acked_frames.len() as u32)
    }

    /// Number of frames submitted but not yet acknowledged.
    pub fn unacked_frames_count(&self) -> usize {
        self.tracked_frames.len()
    }

    /// Clears the in-flight set only; the rate queues are left untouched so
    /// rate history survives a pacer reset.
    pub fn clear(&mut self) {
        self.tracked_frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unacked_count_matches_tracked_minus_acked() {
        let mut log = FrameLog::new();
        log.track_frame(1, 0);
        log.track_frame(2, 0);
        log.track_frame(3, 0);
        assert_eq!(log.unacked_frames_count(), 3);

        log.ack_tracked_frame(2, 10);
        assert_eq!(log.unacked_frames_count(), 2);

        log.ack_tracked_frame(2, 10); // already removed, ignored
        assert_eq!(log.unacked_frames_count(), 2);
    }

    #[test]
    fn rates_reflect_window() {
        let mut log = FrameLog::new();
        log.track_frame(1, 0);
        log.track_frame(2, 500_000);
        log.ack_tracked_frame(1, 100_000);

        let (enc_rate, ack_rate) = log.update_rates(900_000);
        assert_eq!(enc_rate, 2);
        assert_eq!(ack_rate, 1);

        let (enc_rate, ack_rate) = log.update_rates(1_600_000);
        assert_eq!(enc_rate, 0);
        assert_eq!(ack_rate, 0);
    }

    #[test]
    fn unack_last_acked_restores_tracking() {
        let mut log = FrameLog::new();
        log.track_frame(5, 0);
        log.ack_tracked_frame(5, 10);
        assert_eq!(log.unacked_frames_count(), 0);

        log.unack_last_acked_frame(5, 10);
        assert_eq!(log.unacked_frames_count(), 1);
    }
}
