use std::sync::Arc;

use crate::models::error::CaptureError;
use crate::models::event::CaptureEvent;

/// One reply on a host callback channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledged; results follow asynchronously on the same channel.
    Pending,
    /// A non-terminal event. The channel stays open.
    Event(CaptureEvent),
    /// The last message on a recording channel. `None` is the empty closing
    /// event of a stream session.
    Final(Option<CaptureEvent>),
    /// Outcome of a permission query.
    Permission(bool),
    Success,
    Failed(CaptureError),
}

impl Reply {
    /// Whether the host should keep the channel open after this reply.
    pub fn keeps_callback(&self) -> bool {
        matches!(self, Self::Pending | Self::Event(_))
    }
}

/// Host side of a callback channel.
///
/// Called on the thread that drives the session, never from a capture worker.
pub trait ResultCallback: Send + Sync {
    fn send(&self, reply: Reply);
}

impl<F> ResultCallback for F
where
    F: Fn(Reply) + Send + Sync,
{
    fn send(&self, reply: Reply) {
        self(reply)
    }
}

pub type CallbackHandle = Arc<dyn ResultCallback>;
