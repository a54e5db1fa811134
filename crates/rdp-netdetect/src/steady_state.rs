//! Steady-state RTT ping loop: a consumer table deciding how urgently RTT
//! data is wanted, and a ping pipeline that measures it.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

pub(crate) const PING_INTERVAL_HIGH_MS: u64 = 70;
pub(crate) const PING_INTERVAL_LOW_MS: u64 = 700;
pub(crate) const RTT_WINDOW_US: i64 = 500_000;
const ONE_SECOND_US: i64 = 1_000_000;

/// Subsystems that can request RTT data. Only `RDPGFX` exists today; the
/// bitmask leaves room for more without changing the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    RdpGfx,
}

/// How urgently a consumer wants fresh RTT samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Necessity {
    High,
    Low,
}

/// The effective ping cadence derived from the consumer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingInterval {
    None,
    High,
    Low,
}

impl PingInterval {
    pub fn as_duration(self) -> Option<std::time::Duration> {
        match self {
            PingInterval::None => None,
            PingInterval::High => Some(std::time::Duration::from_millis(PING_INTERVAL_HIGH_MS)),
            PingInterval::Low => Some(std::time::Duration::from_millis(PING_INTERVAL_LOW_MS)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PingRecord {
    seq: u16,
    ping_time_us: i64,
}

#[derive(Debug, Clone, Copy)]
struct RttSample {
    rtt_us: i64,
    response_time_us: i64,
}

struct Inner {
    consumers: HashSet<Consumer>,
    high_necessity: HashSet<Consumer>,
    outstanding_seqs: HashSet<u16>,
    pings: VecDeque<PingRecord>,
    rtts: VecDeque<RttSample>,
    next_seq: u16,
}

/// Steady-state network autodetector. Sequence number `0` is reserved for
/// bandwidth-measure probes and is never handed out for a ping.
pub struct SteadyStateAutodetect {
    inner: Mutex<Inner>,
}

impl Default for SteadyStateAutodetect {
    fn default() -> Self {
        Self::new()
    }
}

impl SteadyStateAutodetect {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                consumers: HashSet::new(),
                high_necessity: HashSet::new(),
                outstanding_seqs: HashSet::new(),
                pings: VecDeque::new(),
                rtts: VecDeque::new(),
                next_seq: 1,
            }),
        }
    }

    /// Registers `consumer` as wanting RTT data. Returns the new effective
    /// ping interval.
    pub fn ensure_rtt_consumer(&self, consumer: Consumer, necessity: Necessity) -> PingInterval {
        let mut inner = self.inner.lock().expect("autodetect mutex poisoned");
        inner.consumers.insert(consumer);
        match necessity {
            Necessity::High => {
                inner.high_necessity.insert(consumer);
            }
            Necessity::Low => {
                inner.high_necessity.remove(&consumer);
            }
        }
        Self::effective_interval(&inner)
    }

    pub fn remove_rtt_consumer(&self, consumer: Consumer) -> PingInterval {
        let mut inner = self.inner.lock().expect("autodetect mutex poisoned");
        inner.consumers.remove(&consumer);
        inner.high_necessity.remove(&consumer);
        Self::effective_interval(&inner)
    }

    fn effective_interval(inner: &Inner) -> PingInterval {
        if inner.consumers.is_empty() {
            PingInterval::None
        } else if !inner.high_necessity.is_empty() {
            PingInterval::High
        } else {
            PingInterval::Low
        }
    }

    fn next_free_sequence_number(inner: &mut Inner) -> u16 {
        loop {
            let seq = inner.next_seq;
            inner.next_seq = inner.next_seq.wrapping_add(1);
            if seq != 0 && !inner.outstanding_seqs.contains(&seq) {
                return seq;
            }
        }
    }

    /// Allocates a sequence number and records the ping as outstanding.
    /// Returns the sequence number for the caller to hand to the transport's
    /// `RTTMeasureRequest`.
    pub fn emit_ping(&self, now_us: i64) -> u16 {
        let mut inner = self.inner.lock().expect("autodetect mutex poisoned");
        let seq = Self::next_free_sequence_number(&mut inner);
        inner.outstanding_seqs.insert(seq);
        inner.pings.push_back(PingRecord { seq, ping_time_us: now_us });
        seq
    }

    fn evict_old_rtts(rtts: &mut VecDeque<RttSample>, now_us: i64) {
        while let Some(front) = rtts.front() {
            if now_us - front.response_time_us >= RTT_WINDOW_US {
                rtts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Handles an `RTTMeasureResponse` for `seq`. Pings older than `seq` are
    /// discarded as lost. Returns the new sliding average in microseconds if
    /// any samples remain in the window, for the caller to forward to every
    /// active consumer.
    pub fn rtt_measure_response(&self, seq: u16, now_us: i64) -> Option<i64> {
        let mut inner = self.inner.lock().expect("autodetect mutex poisoned");
        if !inner.outstanding_seqs.remove(&seq) {
            return None;
        }

        let mut matched = None;
        while let Some(ping) = inner.pings.pop_front() {
            if ping.seq == seq {
                matched = Some(ping);
                break;
            }
            // Older, unanswered pings are considered lost.
            inner.outstanding_seqs.remove(&ping.seq);
        }

        let ping = matched?;
        let rtt_us = (now_us - ping.ping_time_us).min(ONE_SECOND_US);
        inner.rtts.push_back(RttSample { rtt_us, response_time_us: now_us });
        Self::evict_old_rtts(&mut inner.rtts, now_us);

        if inner.rtts.is_empty() {
            return None;
        }
        let sum: i64 = inner.rtts.iter().map(|s| s.rtt_us).sum();
        Some(sum / inner.rtts.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_consumer_means_no_ticks() {
        let ad = SteadyStateAutodetect::new();
        assert_eq!(
            SteadyStateAutodetect::effective_interval(&ad.inner.lock().unwrap()),
            PingInterval::None
        );
    }

    #[test]
    fn high_consumer_wins_over_low() {
        let ad = SteadyStateAutodetect::new();
        ad.ensure_rtt_consumer(Consumer::RdpGfx, Necessity::Low);
        assert_eq!(
            ad.ensure_rtt_consumer(Consumer::RdpGfx, Necessity::High),
            PingInterval::High
        );
    }

    #[test]
    fn low_only_consumer() {
        let ad = SteadyStateAutodetect::new();
        assert_eq!(
            ad.ensure_rtt_consumer(Consumer::RdpGfx, Necessity::Low),
            PingInterval::Low
        );
    }

    #[test]
    fn sequence_zero_never_allocated() {
        let ad = SteadyStateAutodetect::new();
        for _ in 0..5 {
            assert_ne!(ad.emit_ping(0), 0);
        }
    }

    #[test]
    fn e5_single_ping_100ms_mean() {
        let ad = SteadyStateAutodetect::new();
        let seq = ad.emit_ping(0);
        assert_eq!(seq, 1);

        let mean = ad.rtt_measure_response(seq, 100_000).unwrap();
        assert_eq!(mean, 100_000);
    }

    #[test]
    fn unmatched_sequence_is_ignored() {
        let ad = SteadyStateAutodetect::new();
        assert_eq!(ad.rtt_measure_response(99, 0), None);
    }

    #[test]
    fn stale_pings_are_dropped_as_lost() {
        let ad = SteadyStateAutodetect::new();
        let seq1 = ad.emit_ping(0);
        let seq2 = ad.emit_ping(10);
        assert!(seq2 > seq1 || seq2 == 0);

        // Respond only to the second ping; the first should be discarded as lost.
        let mean = ad.rtt_measure_response(seq2, 50_000).unwrap();
        assert_eq!(mean, 50_000 - 10);

        // seq1 is no longer outstanding.
        assert_eq!(ad.rtt_measure_response(seq1, 60_000), None);
    }
}
