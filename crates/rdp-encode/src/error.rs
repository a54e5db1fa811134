/// Errors surfaced by the AVC encode session and its collaborators.
///
/// Construction errors abort session startup; per-frame errors leave the
/// session intact for the next frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The device is missing a required capability (no AVC encode
    /// entrypoint, no CQP rate control, no packed headers, no matching
    /// surface format/size support).
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// A VA-API (or other hardware) call returned failure.
    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    /// The requested image view already has a frame pending.
    #[error("image view is already pending encode")]
    Busy,

    /// `lock_bitstream` was called with a view that was never submitted via
    /// `encode_frame`.
    #[error("no pending frame for this image view")]
    NotPending,

    /// `unlock_bitstream` was called with an identity not present in the
    /// locked-bitstreams map.
    #[error("bitstream was not locked")]
    NotLocked,
}
