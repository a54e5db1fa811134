//! `serde`-deserializable tunables for the steady-state and connect-time
//! autodetectors, mirroring `rdp-dbus::config::ServerConfig`'s pattern so
//! operators can override them without a rebuild. Defaults reproduce the
//! constants both state machines otherwise hardcode.

use serde::{Deserialize, Serialize};

use crate::connect_time::{RTT_DETECTION_PING_COUNT, RTT_DETECTION_PING_INTERVAL_MS};
use crate::steady_state::{PING_INTERVAL_HIGH_MS, PING_INTERVAL_LOW_MS, RTT_WINDOW_US};

/// Overrides for both autodetection state machines in this crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AutodetectConfig {
    /// Steady-state ping cadence while a consumer wants RTT data urgently.
    pub ping_interval_high_ms: u64,

    /// Steady-state ping cadence while only low-priority consumers want data.
    pub ping_interval_low_ms: u64,

    /// Width of the sliding window used to average steady-state RTT samples.
    pub rtt_window_us: i64,

    /// Number of RTT-detection pings sent during connect-time probing.
    pub rtt_detection_ping_count: u32,

    /// Interval between connect-time RTT-detection pings.
    pub rtt_detection_ping_interval_ms: u64,
}

impl Default for AutodetectConfig {
    fn default() -> Self {
        Self {
            ping_interval_high_ms: PING_INTERVAL_HIGH_MS,
            ping_interval_low_ms: PING_INTERVAL_LOW_MS,
            rtt_window_us: RTT_WINDOW_US,
            rtt_detection_ping_count: RTT_DETECTION_PING_COUNT,
            rtt_detection_ping_interval_ms: RTT_DETECTION_PING_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let config = AutodetectConfig::default();
        assert_eq!(config.ping_interval_high_ms, 70);
        assert_eq!(config.ping_interval_low_ms, 700);
        assert_eq!(config.rtt_window_us, 500_000);
        assert_eq!(config.rtt_detection_ping_count, 10);
        assert_eq!(config.rtt_detection_ping_interval_ms, 10);
    }

    #[test]
    fn deserializes_partial_toml_with_field_defaults() {
        let config: AutodetectConfig = toml::from_str("ping_interval_high_ms = 50\n").unwrap();
        assert_eq!(config.ping_interval_high_ms, 50);
        assert_eq!(config.rtt_window_us, RTT_WINDOW_US);
    }
}
