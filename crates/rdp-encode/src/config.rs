//! `serde`-deserializable tunables for [`crate::avc_session`], loaded from
//! the same TOML file `rdp-dbus::config::ServerConfig` reads, under an
//! `[encode.session]` table. Defaults reproduce the constants the session
//! otherwise hardcodes.

use serde::{Deserialize, Serialize};

use crate::avc_session::{PIC_INIT_QP, QUALITY, QUALITY_LEVEL};

/// Overrides for [`crate::avc_session::AvcEncodeSession`]'s constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeSessionConfig {
    /// CQP rate-control target QP. The source always submits 22.
    pub pic_init_qp: i32,

    /// `quality` value reported in every [`crate::avc_session::AvcFrameInfo`].
    pub quality: u8,

    /// Quality level submitted on IDR frames when the device advertises
    /// quality-level support.
    pub quality_level: u8,
}

impl Default for EncodeSessionConfig {
    fn default() -> Self {
        Self {
            pic_init_qp: PIC_INIT_QP,
            quality: QUALITY,
            quality_level: QUALITY_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let config = EncodeSessionConfig::default();
        assert_eq!(config.pic_init_qp, 22);
        assert_eq!(config.quality, 100);
        assert_eq!(config.quality_level, 0);
    }

    #[test]
    fn deserializes_partial_toml_with_field_defaults() {
        let config: EncodeSessionConfig = toml::from_str("pic_init_qp = 26\n").unwrap();
        assert_eq!(config.pic_init_qp, 26);
        assert_eq!(config.quality, QUALITY);
    }
}
