use super::config::SinkKind;
use super::error::CaptureError;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → awaiting-permission → recording(stream | file)
///   ↑            │                    │        │
///   └── stop ────┴──── denied ──→ error ←──────┘ (worker failure)
/// ```
///
/// There is no terminal state: `stop` always returns to `Idle`, and `start`
/// is accepted from every state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Recording(SinkKind),
    Error(CaptureError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    pub fn is_awaiting_permission(&self) -> bool {
        matches!(self, Self::AwaitingPermission)
    }

    pub fn sink_kind(&self) -> Option<SinkKind> {
        match self {
            Self::Recording(kind) => Some(*kind),
            _ => None,
        }
    }
}
