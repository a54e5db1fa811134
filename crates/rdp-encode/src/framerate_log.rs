//! Dual-frame gate: decides whether the next frame is worth encoding as a
//! main+auxiliary dual view, based on a 500 ms sliding window of encode
//! rate samples.

use std::collections::VecDeque;
use std::sync::Mutex;

const STABLE_ENCODING_RATE_THRESHOLD_PERCENT: f64 = 0.8;
const MIN_N_ENC_RATES: usize = 4;
const MIN_ENC_RATE_THRESHOLD: u32 = 5;
const MIN_VIDEO_FRAMERATE: u32 = 24;
const SAMPLE_WINDOW_US: i64 = 500_000;

#[derive(Debug, Clone, Copy)]
struct EncRateSample {
    enc_rate: u32,
    tracked_time_us: i64,
}

/// Stats reported once per frame by the pipeline to the framerate log.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub enc_rate: u32,
    pub ack_rate: u32,
    pub missing_dual_frame_acks: u32,
}

struct Inner {
    samples: VecDeque<EncRateSample>,
    last_ack_rate: u32,
    missing_dual_frame_acks: u32,
}

/// Lock-protected queue of recent encode rate samples plus the latest ack
/// rate, matching `GrdRdpGfxFramerateLog`.
pub struct FramerateLog {
    inner: Mutex<Inner>,
}

impl Default for FramerateLog {
    fn default() -> Self {
        Self::new()
    }
}

impl FramerateLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                last_ack_rate: 0,
                missing_dual_frame_acks: 0,
            }),
        }
    }

    fn evict_old(samples: &mut VecDeque<EncRateSample>, now_us: i64) {
        while let Some(front) = samples.front() {
            if now_us - front.tracked_time_us >= SAMPLE_WINDOW_US {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn notify_frame_stats(&self, stats: FrameStats, now_us: i64) {
        let mut inner = self.inner.lock().expect("framerate log mutex poisoned");
        Self::evict_old(&mut inner.samples, now_us);
        inner.samples.push_back(EncRateSample {
            enc_rate: stats.enc_rate,
            tracked_time_us: now_us,
        });
        inner.last_ack_rate = stats.ack_rate;
        inner.missing_dual_frame_acks = stats.missing_dual_frame_acks;
    }

    fn has_stable_enc_rate(enc_rate_min: u32, enc_rate_median: u32) -> bool {
        f64::from(enc_rate_min)
            >= (f64::from(enc_rate_median) * STABLE_ENCODING_RATE_THRESHOLD_PERCENT).floor()
    }

    /// Decides whether the next frame should avoid the dual-view encode.
    /// See SPEC_FULL.md §4.4 for the exact algorithm this implements.
    pub fn should_avoid_dual_frame(&self, now_us: i64) -> bool {
        let mut inner = self.inner.lock().expect("framerate log mutex poisoned");
        Self::evict_old(&mut inner.samples, now_us);

        if inner.samples.len() < MIN_N_ENC_RATES {
            return false;
        }

        let mut sorted: Vec<u32> = inner.samples.iter().map(|s| s.enc_rate).collect();
        sorted.sort_unstable();
        let n = sorted.len();

        let enc_rate_min = sorted[0];
        let enc_rate_quartile3 = sorted[n - 1 - n / 4];
        let enc_rate_median = sorted[n - 1 - 2 * (n / 4)];

        let last_ack_rate = inner.last_ack_rate;
        let missing_dual_frame_acks = inner.missing_dual_frame_acks;
        drop(inner);

        if enc_rate_median < MIN_ENC_RATE_THRESHOLD {
            return false;
        }

        if enc_rate_median >= MIN_VIDEO_FRAMERATE
            || Self::has_stable_enc_rate(enc_rate_min, enc_rate_median)
        {
            return enc_rate_quartile3 + 3 * missing_dual_frame_acks >= last_ack_rate;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(log: &FramerateLog, rates: &[u32], ack_rate: u32, missing: u32) {
        for (i, rate) in rates.iter().enumerate() {
            log.notify_frame_stats(
                FrameStats {
                    enc_rate: *rate,
                    ack_rate,
                    missing_dual_frame_acks: missing,
                },
                i as i64 * 1_000,
            );
        }
    }

    #[test]
    fn fewer_than_four_samples_never_avoids() {
        let log = FramerateLog::new();
        feed(&log, &[10, 10, 10], 11, 0);
        assert!(!log.should_avoid_dual_frame(3_000));
    }

    #[test]
    fn property_5_first_case_returns_false() {
        let log = FramerateLog::new();
        feed(&log, &[10, 10, 10, 10], 11, 0);
        // median=10, quartile3=10, stable (min 10 >= floor(10*0.8)=8)
        // 10 + 0 >= 11 is false.
        assert!(!log.should_avoid_dual_frame(4_000));
    }

    #[test]
    fn property_5_second_case_returns_true() {
        let log = FramerateLog::new();
        feed(&log, &[12, 12, 12, 12], 11, 0);
        // median=12, quartile3=12, 12 + 0 >= 11 is true.
        assert!(log.should_avoid_dual_frame(4_000));
    }

    #[test]
    fn low_median_never_avoids() {
        let log = FramerateLog::new();
        feed(&log, &[1, 2, 3, 4], 1, 10);
        assert!(!log.should_avoid_dual_frame(4_000));
    }

    #[test]
    fn unstable_mid_range_median_returns_false_regardless_of_missing_acks() {
        let log = FramerateLog::new();
        // sorted [1,10,10,10]: median=10 (in [5,24)), min=1 < floor(10*0.8)=8,
        // so the encoding rate is unstable and the gate must return false
        // even though quartile3(10) + 3*missing(50) would otherwise clear
        // last_ack_rate easily.
        feed(&log, &[10, 1, 10, 10], 100, 50);
        assert!(!log.should_avoid_dual_frame(4_000));
    }

    #[test]
    fn old_samples_are_evicted() {
        let log = FramerateLog::new();
        feed(&log, &[10, 10, 10, 10], 11, 0);
        assert!(!log.should_avoid_dual_frame(600_000));
    }
}
