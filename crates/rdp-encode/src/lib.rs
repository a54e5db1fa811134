//! H.264/AVC hardware encode orchestration for cosmic-ext-rdp-server.
//!
//! - `nal_writer`: bit-level AVC bitstream emitter (AUD/SPS/PPS/slice header).
//! - `avc_session`: the encode session itself (surface pool, reference
//!   tracking, per-frame protocol), behind a `HardwareEncoder` trait seam
//!   with no production backend wired in yet (see `DESIGN.md`).
//! - `frame_log` / `framerate_log` / `frame_controller`: in-flight frame
//!   accounting and the pacing state machine that consumes it.
//! - `decode`: capability scaffold for a future decode-session backend.
//! - `debug`: process-wide debug flags.
//! - `gstreamer_enc`: the H.264 encode path actually driving
//!   `cosmic-ext-rdp-server`'s EGFX delivery today.
//! - `config`: serde-deserializable tunables for the encode session and
//!   network autodetector.

pub mod avc_session;
pub mod config;
pub mod debug;
pub mod decode;
pub mod error;
pub mod frame_controller;
pub mod frame_log;
pub mod framerate_log;
pub mod gstreamer_enc;
pub mod nal_writer;

pub use error::EncodeError;
pub use gstreamer_enc::{EncoderConfig, GstEncoder, H264Frame};
