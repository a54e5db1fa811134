//! Network autodetection for cosmic-ext-rdp-server.
//!
//! - `connect_time`: one-shot bandwidth+RTT burst probe run at session start.
//! - `steady_state`: ongoing RTT ping loop driven by consumer necessity.
//! - `config`: serde-deserializable overrides for both state machines.

pub mod config;
pub mod connect_time;
pub mod error;
pub mod steady_state;

pub use config::AutodetectConfig;
pub use error::AutodetectError;
