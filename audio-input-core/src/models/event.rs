use super::recording_result::RecordingResult;

/// An event produced by a capture worker and relayed to the result callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One encoded chunk of a stream session.
    Data(String),
    /// A failure description. Non-fatal while recording; terminal when it
    /// ends a file session.
    Error(String),
    /// The finished WAV file of a file session.
    File(RecordingResult),
}

impl CaptureEvent {
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}
