use crate::ViewId;

/// Errors surfaced by GPU view construction.
#[derive(Debug, thiserror::Error)]
pub enum ViewCreatorError {
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("hardware failure: {0}")]
    HardwareFailure(String),

    #[error("view {0:?} is already in flight")]
    Busy(ViewId),

    #[error("view {0:?} has no in-flight dispatch to finish")]
    NotPending(ViewId),

    #[error("fence wait timed out after {0:?}")]
    FenceTimeout(std::time::Duration),
}
