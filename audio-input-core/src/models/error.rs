use thiserror::Error;

/// Wire code reported when microphone permission is refused.
pub const PERMISSION_DENIED_ERROR: i32 = 20;
/// Wire code reported for a malformed or non-local destination.
pub const INVALID_URL_ERROR: i32 = 30;
/// Wire code reported when `stop` is called without an active recording.
pub const INVALID_STATE_ERROR: i32 = 40;

/// Errors that can occur during audio capture operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("invalid destination url: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device error: {0}")]
    Device(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl CaptureError {
    /// Numeric code surfaced to the host, if this error belongs to one of the
    /// three classes the command surface reports synchronously.
    ///
    /// Configuration problems other than the URL share the URL code: both are
    /// rejected before any device is opened.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::PermissionDenied => Some(PERMISSION_DENIED_ERROR),
            Self::InvalidUrl(_) | Self::InvalidConfiguration(_) => Some(INVALID_URL_ERROR),
            Self::InvalidState(_) => Some(INVALID_STATE_ERROR),
            _ => None,
        }
    }

    pub(crate) fn storage(context: &str, err: std::io::Error) -> Self {
        Self::Storage(format!("{}: {}", context, err))
    }
}

/// Failure of a single blocking device read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The read failed but the device is still usable; the loop continues.
    #[error("read failed: {0}")]
    Transient(String),

    /// The device can no longer deliver audio; the loop ends.
    #[error("device failed: {0}")]
    Fatal(String),
}

impl ReadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
