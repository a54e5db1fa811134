//! Pacing state machine that decides when encoding must be suspended
//! because too many frames are in flight, driven by unacked-frame counts
//! and the latest network round-trip time.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::frame_log::FrameLog;

const ACTIVATE_THROTTLING_TH_DEFAULT: u32 = 2;
const DEACTIVATE_THROTTLING_TH_DEFAULT: u32 = 1;

/// Pacer state, matching `GrdRdpGfxFrameController`'s three-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlingState {
    Inactive,
    Active,
    ActiveLoweringLatency,
}

/// `activate_th(rtt_us) = clamp(delayed_frames + 2, 2, refresh_rate)`.
pub fn activate_throttling_threshold(rtt_us: i64, refresh_rate: u32) -> u32 {
    let delayed_frames = (rtt_us as i64 * i64::from(refresh_rate) / 1_000_000).max(0) as u32;
    (delayed_frames + 2).clamp(ACTIVATE_THROTTLING_TH_DEFAULT, refresh_rate)
}

/// Per-surface pacer. Holds its own [`FrameLog`] since the two are always
/// consulted together (unack/ack bookkeeping drives both).
pub struct FrameController {
    refresh_rate: u32,
    state: ThrottlingState,
    activate_th: u32,
    last_rtt_us: i64,
    encoding_suspended: bool,
    frame_log: FrameLog,
    /// Posted whenever encoding transitions from suspended to runnable, the
    /// analogue of the source's edge-triggered "pending encode" `GSource`.
    wakeup: Arc<Notify>,
}

impl FrameController {
    pub fn new(refresh_rate: u32) -> Self {
        Self {
            refresh_rate,
            state: ThrottlingState::Inactive,
            activate_th: ACTIVATE_THROTTLING_TH_DEFAULT,
            last_rtt_us: 0,
            encoding_suspended: false,
            frame_log: FrameLog::new(),
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ThrottlingState {
        self.state
    }

    pub fn is_encoding_suspended(&self) -> bool {
        self.encoding_suspended
    }

    /// A handle producers elsewhere can `notified().await` on to learn when
    /// encoding has become runnable again.
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    fn set_suspended(&mut self, suspended: bool) {
        let was_suspended = self.encoding_suspended;
        self.encoding_suspended = suspended;
        if was_suspended && !suspended {
            self.wakeup.notify_one();
        }
    }

    fn n_unacked(&self) -> u32 {
        self.frame_log.unacked_frames_count() as u32
    }

    fn recompute_activate_th(&self) -> u32 {
        activate_throttling_threshold(self.last_rtt_us, self.refresh_rate)
    }

    /// A frame was submitted for encoding at `enc_time_us`.
    pub fn unack_frame(&mut self, frame_id: u32, enc_time_us: i64, enc_rate: u32, ack_rate: u32) {
        self.frame_log.track_frame(frame_id, enc_time_us);
        let n_unacked = self.n_unacked();

        match self.state {
            ThrottlingState::Inactive => {
                self.activate_th = self.recompute_activate_th();
                if n_unacked >= self.activate_th {
                    self.state = ThrottlingState::Active;
                    self.set_suspended(true);
                }
            }
            ThrottlingState::Active => {
                let new_th = self.recompute_activate_th();
                if new_th < self.activate_th {
                    self.activate_th = new_th;
                    self.state = ThrottlingState::ActiveLoweringLatency;
                    self.set_suspended(true);
                } else {
                    self.activate_th = new_th;
                    self.set_suspended(enc_rate > ack_rate + 1);
                }
            }
            ThrottlingState::ActiveLoweringLatency => {
                debug_assert!(self.encoding_suspended);
            }
        }
    }

    /// A client acknowledgement arrived for `frame_id` at `ack_time_us`.
    pub fn ack_frame(&mut self, frame_id: u32, ack_time_us: i64, enc_rate: u32, ack_rate: u32) {
        self.frame_log.ack_tracked_frame(frame_id, ack_time_us);
        let n_unacked = self.n_unacked();

        match self.state {
            ThrottlingState::Inactive => {}
            ThrottlingState::Active => {
                if n_unacked <= DEACTIVATE_THROTTLING_TH_DEFAULT {
                    self.state = ThrottlingState::Inactive;
                    self.set_suspended(false);
                    return;
                }
                let new_th = self.recompute_activate_th();
                if new_th < self.activate_th {
                    self.activate_th = new_th;
                    self.state = ThrottlingState::ActiveLoweringLatency;
                    self.set_suspended(true);
                } else {
                    self.activate_th = new_th;
                    self.set_suspended(enc_rate > ack_rate);
                }
            }
            ThrottlingState::ActiveLoweringLatency => {
                let new_th = self.recompute_activate_th();
                self.activate_th = new_th;
                if n_unacked < new_th {
                    self.state = ThrottlingState::Inactive;
                    self.set_suspended(false);
                } else if n_unacked == new_th {
                    self.state = ThrottlingState::Active;
                    self.set_suspended(enc_rate > ack_rate);
                } else {
                    debug_assert!(self.encoding_suspended);
                }
            }
        }
    }

    /// Pipeline rewrite: treat the most recent ack as unacked again.
    pub fn unack_last_acked_frame(&mut self, frame_id: u32, time_us: i64) {
        assert_ne!(
            self.state,
            ThrottlingState::ActiveLoweringLatency,
            "cannot rewrite while the pipeline is lowering latency"
        );
        self.frame_log.unack_last_acked_frame(frame_id, time_us);
    }

    /// Full reset: clears in-flight bookkeeping and returns to `Inactive`.
    pub fn clear_all_unacked_frames(&mut self) {
        self.frame_log.clear();
        self.state = ThrottlingState::Inactive;
        self.set_suspended(false);
    }

    /// Stores a new RTT sample from the network autodetector and
    /// re-evaluates the throttling threshold. Rejected while
    /// `ActiveLoweringLatency`, since the pipeline rewrite that state
    /// represents cannot accept a new round trip time concurrently.
    pub fn notify_new_round_trip_time(&mut self, rtt_us: i64) {
        if self.state == ThrottlingState::ActiveLoweringLatency {
            return;
        }
        self.last_rtt_us = rtt_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_th_is_monotonic_in_rtt_and_bounded() {
        let refresh_rate = 60;
        let mut prev = 0;
        for rtt_ms in [0, 10, 25, 50, 100, 500, 1000] {
            let th = activate_throttling_threshold(rtt_ms * 1_000, refresh_rate);
            assert!(th >= prev);
            assert!(th <= refresh_rate);
            prev = th;
        }
    }

    #[test]
    fn e4_walkthrough() {
        let mut ctrl = FrameController::new(60);
        ctrl.notify_new_round_trip_time(50_000);
        assert_eq!(activate_throttling_threshold(50_000, 60), 5);

        for id in 1..=4u32 {
            ctrl.unack_frame(id, id as i64, 0, 0);
            assert_eq!(ctrl.state(), ThrottlingState::Inactive);
        }

        ctrl.unack_frame(5, 5, 0, 0);
        assert_eq!(ctrl.state(), ThrottlingState::Active);
        assert!(ctrl.is_encoding_suspended());

        ctrl.ack_frame(1, 10, 0, 0);
        assert_eq!(ctrl.state(), ThrottlingState::Active); // 4 unacked > 1

        for id in 2..=4u32 {
            ctrl.ack_frame(id, 10, 0, 0);
        }
        // 1 unacked left (frame 5) <= deactivate_th(1)
        assert_eq!(ctrl.state(), ThrottlingState::Inactive);
        assert!(!ctrl.is_encoding_suspended());
    }

    #[tokio::test]
    async fn wakeup_fires_on_resume() {
        let mut ctrl = FrameController::new(60);
        let wakeup = ctrl.wakeup_handle();
        ctrl.notify_new_round_trip_time(0);
        ctrl.unack_frame(1, 0, 0, 0);
        ctrl.unack_frame(2, 0, 0, 0); // activate_th=2, now Active+suspended
        assert!(ctrl.is_encoding_suspended());

        ctrl.ack_frame(1, 1, 0, 0);
        ctrl.ack_frame(2, 1, 0, 0);
        assert!(!ctrl.is_encoding_suspended());

        tokio::time::timeout(std::time::Duration::from_millis(50), wakeup.notified())
            .await
            .expect("resume should have posted a wakeup");
    }
}
