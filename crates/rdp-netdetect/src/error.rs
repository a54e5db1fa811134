/// Errors surfaced by network autodetection.
#[derive(Debug, thiserror::Error)]
pub enum AutodetectError {
    /// A PDU arrived in a state that does not allow it (stray Sync, bandwidth
    /// result out of sequence). Logged and ignored by the caller.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}
