use thiserror::Error;

use audio_input_core::{CaptureError, INVALID_URL_ERROR};

/// Errors returned by [`AudioInputPlugin::execute`](crate::AudioInputPlugin::execute).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    #[error("arguments must be a JSON array")]
    NotAnArray,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl BridgeError {
    /// Numeric code sent to the host for this error, if any.
    ///
    /// Malformed arguments are a configuration problem and share the
    /// configuration code. Unknown actions get no reply at all.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::UnknownAction(_) => None,
            Self::Arguments(_) | Self::NotAnArray => Some(INVALID_URL_ERROR),
            Self::Capture(e) => e.code(),
        }
    }
}
