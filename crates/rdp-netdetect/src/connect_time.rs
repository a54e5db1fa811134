//! Connect-time autodetection: a one-shot state machine run once per
//! session to estimate baseline bandwidth and RTT before steady-state
//! pinging takes over.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::AutodetectError;

/// Payload size of one bandwidth-measure chunk, bytes.
const BW_PAYLOAD_BYTES: u64 = 15 * 1024 + 512 + 256 + 128 + 64;
/// A burst's response is considered too slow past this latency.
const BURST_LATENCY_TIMEOUT_MS: u64 = 400;
/// A burst's reported time delta is considered saturating past this value.
const BURST_TIME_DELTA_SATURATED_MS: u64 = 100;
/// Payload counts for the three bandwidth-measure bursts.
const BURST_PAYLOAD_COUNTS: [u32; 3] = [1, 4, 16];
/// Number of RTT-detection pings and their interval.
pub(crate) const RTT_DETECTION_PING_COUNT: u32 = 10;
pub(crate) const RTT_DETECTION_PING_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    None,
    MeasureBw1,
    AwaitBwResult1,
    MeasureBw2,
    AwaitBwResult2,
    MeasureBw3,
    AwaitBwResult3,
    StartRttDetection,
    InRttDetection,
    AwaitLastRttResponse,
    SendNetCharResult,
    Complete,
}

/// Response to a single bandwidth-measure burst.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthBurstResult {
    pub response_latency_ms: u64,
    pub time_delta_ms: u64,
    pub byte_count: u64,
}

/// Final characteristics reported to the pacer/frame controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCharacteristicsResult {
    pub base_rtt_us: i64,
    pub average_rtt_us: i64,
    pub bandwidth_kbits: u64,
}

/// Shared mutex+condvar pair backing the Sync-PDU pending flag and the
/// shutdown signal: a `std::sync::Mutex` guarding plain state plus a
/// `tokio::sync::Notify` standing in for the source's `GMutex`/condvar,
/// the same pattern `rdp-input::event_queue` and
/// `rdp-encode::frame_controller` already use for their edge-triggered
/// wakeups. Cloning shares the same underlying gate, so the session
/// thread (waiter) and the pipeline thread (clearer) can each hold a
/// handle without sharing the rest of [`ConnectTimeAutodetect`].
#[derive(Clone)]
struct SyncGate(Arc<(Mutex<GateState>, Notify)>);

#[derive(Default)]
struct GateState {
    pending_sync: bool,
    shutdown: bool,
}

impl SyncGate {
    fn new() -> Self {
        Self(Arc::new((Mutex::new(GateState::default()), Notify::new())))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.0 .0.lock().expect("connect-time sync gate mutex poisoned")
    }

    /// Marks a `NetworkCharacteristicsSync` PDU as pending.
    fn request_sync(&self) {
        self.lock().pending_sync = true;
    }

    /// Called from the pipeline-thread sync callback once the reset this
    /// PDU requested has been applied; wakes any waiter.
    fn clear_pending_sync(&self) {
        self.lock().pending_sync = false;
        self.0 .1.notify_waiters();
    }

    fn signal_shutdown(&self) {
        self.lock().shutdown = true;
        self.0 .1.notify_waiters();
    }

    fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Blocks until the pending-sync flag is cleared or shutdown is
    /// signaled. Returns `true` if it cleared normally, `false` if it
    /// returned because of shutdown. Re-checks after every wakeup since
    /// `notify_waiters` can fire spuriously with respect to either flag.
    async fn wait_for_clear(&self) -> bool {
        loop {
            {
                let state = self.lock();
                if state.shutdown {
                    return false;
                }
                if !state.pending_sync {
                    return true;
                }
            }
            self.0 .1.notified().await;
        }
    }
}

/// One-shot connect-time probe. Not `Sync` itself, but [`Self::sync_gate`]
/// hands out a cloneable handle to the pending-sync/shutdown state so the
/// pipeline thread can clear the flag and signal shutdown from outside the
/// session thread that owns this value.
pub struct ConnectTimeAutodetect {
    state: State,
    burst_index: usize,
    rtt_pings_sent: u32,
    rtts_us: Vec<i64>,
    last_burst: Option<BandwidthBurstResult>,
    gate: SyncGate,
}

impl Default for ConnectTimeAutodetect {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectTimeAutodetect {
    pub fn new() -> Self {
        Self {
            state: State::None,
            burst_index: 0,
            rtt_pings_sent: 0,
            rtts_us: Vec::new(),
            last_burst: None,
            gate: SyncGate::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Starts the first bandwidth-measure burst.
    pub fn start(&mut self) {
        assert_eq!(self.state, State::None);
        self.state = State::MeasureBw1;
    }

    pub fn current_burst_payload_count(&self) -> u32 {
        BURST_PAYLOAD_COUNTS[self.burst_index]
    }

    pub fn current_burst_payload_bytes(&self) -> u64 {
        u64::from(self.current_burst_payload_count()) * BW_PAYLOAD_BYTES
    }

    fn burst_is_saturated(result: &BandwidthBurstResult) -> bool {
        result.response_latency_ms >= BURST_LATENCY_TIMEOUT_MS
            || result.time_delta_ms >= BURST_TIME_DELTA_SATURATED_MS
    }

    /// Call when a bandwidth-measure burst's result arrives.
    pub fn handle_bandwidth_result(
        &mut self,
        result: BandwidthBurstResult,
    ) -> Result<(), AutodetectError> {
        let expected = match self.burst_index {
            0 => State::AwaitBwResult1,
            1 => State::AwaitBwResult2,
            2 => State::AwaitBwResult3,
            _ => unreachable!("only three bandwidth bursts are scheduled"),
        };
        if self.state != expected {
            return Err(AutodetectError::ProtocolViolation(format!(
                "bandwidth result received in state {:?}, expected {:?}",
                self.state, expected
            )));
        }

        self.last_burst = Some(result);

        if Self::burst_is_saturated(&result) || self.burst_index == BURST_PAYLOAD_COUNTS.len() - 1 {
            self.state = State::StartRttDetection;
        } else {
            self.burst_index += 1;
            self.state = match self.burst_index {
                1 => State::MeasureBw2,
                2 => State::MeasureBw3,
                _ => unreachable!(),
            };
        }
        Ok(())
    }

    /// Transitions out of `MeasureBwN` into the matching await state, called
    /// once the burst has actually been sent on the wire.
    pub fn mark_burst_sent(&mut self) {
        self.state = match self.state {
            State::MeasureBw1 => State::AwaitBwResult1,
            State::MeasureBw2 => State::AwaitBwResult2,
            State::MeasureBw3 => State::AwaitBwResult3,
            other => other,
        };
    }

    pub fn begin_rtt_detection(&mut self) {
        assert_eq!(self.state, State::StartRttDetection);
        self.state = State::InRttDetection;
        self.rtt_pings_sent = 0;
    }

    pub fn rtt_ping_interval_ms(&self) -> u64 {
        RTT_DETECTION_PING_INTERVAL_MS
    }

    /// Records one RTT-detection ping response. The tenth (last) response
    /// seals the measurement and moves to reporting.
    pub fn handle_rtt_ping_response(&mut self, rtt_us: i64) {
        assert!(matches!(self.state, State::InRttDetection | State::AwaitLastRttResponse));
        self.rtts_us.push(rtt_us);
        self.rtt_pings_sent += 1;

        if self.rtt_pings_sent >= RTT_DETECTION_PING_COUNT {
            self.state = State::SendNetCharResult;
        } else if self.rtt_pings_sent == RTT_DETECTION_PING_COUNT - 1 {
            self.state = State::AwaitLastRttResponse;
        }
    }

    /// Builds the final result once in `SendNetCharResult`.
    pub fn finish(&mut self) -> Result<NetworkCharacteristicsResult, AutodetectError> {
        if self.state != State::SendNetCharResult {
            return Err(AutodetectError::ProtocolViolation(format!(
                "finish() called in state {:?}, expected SendNetCharResult",
                self.state
            )));
        }

        let base_rtt_us = *self.rtts_us.first().unwrap_or(&0);
        let average_rtt_us = if self.rtts_us.is_empty() {
            0
        } else {
            self.rtts_us.iter().sum::<i64>() / self.rtts_us.len() as i64
        };
        let bandwidth_kbits = self.last_burst.map_or(0, |burst| {
            (burst.byte_count * 8) / burst.time_delta_ms.max(1)
        });

        self.state = State::Complete;
        Ok(NetworkCharacteristicsResult {
            base_rtt_us,
            average_rtt_us,
            bandwidth_kbits,
        })
    }

    /// True while a `NetworkCharacteristicsSync` PDU must be rejected as a
    /// protocol violation — any state other than `None` or `Complete`.
    pub fn sync_pdu_is_violation(&self) -> bool {
        !matches!(self.state, State::None | State::Complete)
            && !matches!(self.state, State::InRttDetection | State::AwaitLastRttResponse)
    }

    /// A handle the pipeline thread can clone and hold onto, to clear the
    /// pending-sync flag (once it has applied the reset a Sync PDU
    /// requested) or to observe shutdown independently of the session
    /// thread that owns `self`.
    fn sync_gate(&self) -> SyncGate {
        self.gate.clone()
    }

    /// Called when a `NetworkCharacteristicsSync` PDU arrives mid-detection
    /// (i.e. `sync_pdu_is_violation()` was false). Blocks until the
    /// pipeline-thread sync callback calls [`Self::clear_pending_sync`], or
    /// until shutdown is signaled. Returns `true` if the wait ended because
    /// the flag cleared, `false` if it ended because of shutdown.
    pub async fn await_sync_clear(&self) -> bool {
        let gate = self.sync_gate();
        gate.request_sync();
        gate.wait_for_clear().await
    }

    /// Pipeline-thread callback: clears the pending-sync flag and wakes
    /// whatever is blocked in [`Self::await_sync_clear`].
    pub fn clear_pending_sync(&self) {
        self.gate.clear_pending_sync();
    }

    /// Requests shutdown; broadcasts to any waiter in
    /// [`Self::await_sync_clear`], which must re-check `in_shutdown` after
    /// waking since the wake is spurious with respect to their condition.
    /// Takes `&self`, not `&mut self`: any thread holding a reference (not
    /// just the owning session thread) may signal shutdown.
    pub fn invoke_shutdown(&self) {
        self.gate.signal_shutdown();
    }

    pub fn in_shutdown(&self) -> bool {
        self.gate.is_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e6_burst_1_fast_advances_to_burst_2() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        assert_eq!(ad.state(), State::MeasureBw1);
        ad.mark_burst_sent();
        assert_eq!(ad.state(), State::AwaitBwResult1);

        ad.handle_bandwidth_result(BandwidthBurstResult {
            response_latency_ms: 50,
            time_delta_ms: 50,
            byte_count: 15_000,
        })
        .unwrap();
        assert_eq!(ad.state(), State::MeasureBw2);
    }

    #[test]
    fn e6_burst_2_slow_jumps_to_rtt_detection() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        ad.mark_burst_sent();
        ad.handle_bandwidth_result(BandwidthBurstResult {
            response_latency_ms: 50,
            time_delta_ms: 50,
            byte_count: 15_000,
        })
        .unwrap();

        ad.mark_burst_sent();
        ad.handle_bandwidth_result(BandwidthBurstResult {
            response_latency_ms: 500,
            time_delta_ms: 500,
            byte_count: 60_000,
        })
        .unwrap();
        assert_eq!(ad.state(), State::StartRttDetection);
    }

    #[test]
    fn third_burst_always_advances_to_rtt_detection() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        for _ in 0..3 {
            ad.mark_burst_sent();
            let before = ad.state();
            if before == State::StartRttDetection {
                break;
            }
            ad.handle_bandwidth_result(BandwidthBurstResult {
                response_latency_ms: 10,
                time_delta_ms: 10,
                byte_count: 1_000,
            })
            .unwrap();
        }
        assert_eq!(ad.state(), State::StartRttDetection);
    }

    #[test]
    fn rtt_detection_seals_after_ten_pings() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        ad.mark_burst_sent();
        ad.handle_bandwidth_result(BandwidthBurstResult {
            response_latency_ms: 500,
            time_delta_ms: 500,
            byte_count: 30_000,
        })
        .unwrap();
        ad.begin_rtt_detection();

        for _ in 0..9 {
            ad.handle_rtt_ping_response(20_000);
        }
        assert_eq!(ad.state(), State::AwaitLastRttResponse);

        ad.handle_rtt_ping_response(20_000);
        assert_eq!(ad.state(), State::SendNetCharResult);

        let result = ad.finish().unwrap();
        assert_eq!(result.average_rtt_us, 20_000);
        assert_eq!(result.bandwidth_kbits, (30_000 * 8) / 500);
    }

    #[test]
    fn sync_pdu_mid_detection_is_not_a_protocol_violation() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        ad.mark_burst_sent();
        ad.handle_bandwidth_result(BandwidthBurstResult {
            response_latency_ms: 500,
            time_delta_ms: 500,
            byte_count: 1_000,
        })
        .unwrap();
        ad.begin_rtt_detection();
        assert!(!ad.sync_pdu_is_violation());
    }

    #[test]
    fn sync_pdu_during_bandwidth_measure_is_a_violation() {
        let mut ad = ConnectTimeAutodetect::new();
        ad.start();
        assert!(ad.sync_pdu_is_violation());
    }

    #[tokio::test]
    async fn await_sync_clear_resolves_once_pipeline_thread_clears_it() {
        let ad = ConnectTimeAutodetect::new();
        let gate = ad.sync_gate();

        let clearer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            gate.clear_pending_sync();
        });

        let cleared = tokio::time::timeout(std::time::Duration::from_millis(200), ad.await_sync_clear())
            .await
            .expect("await_sync_clear should resolve once the pipeline thread clears it");
        assert!(cleared);
        clearer.await.unwrap();
    }

    #[tokio::test]
    async fn await_sync_clear_returns_false_on_shutdown() {
        let ad = ConnectTimeAutodetect::new();
        let gate = ad.sync_gate();

        let shutter = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            gate.signal_shutdown();
        });

        let cleared = tokio::time::timeout(std::time::Duration::from_millis(200), ad.await_sync_clear())
            .await
            .expect("await_sync_clear should resolve once shutdown is signaled");
        assert!(!cleared);
        assert!(ad.in_shutdown());
        shutter.await.unwrap();
    }
}
