use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use audio_input_core::{CaptureError, CaptureEvent, Reply, ResultCallback};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    NoResult,
    Error,
}

/// A reply as the host receives it.
///
/// `keep_callback` tells the host whether more replies will follow on the
/// same callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub status: Status,
    pub message: Value,
    pub keep_callback: bool,
}

impl PluginResult {
    pub fn ok(message: Value) -> Self {
        Self {
            status: Status::Ok,
            message,
            keep_callback: false,
        }
    }

    /// Acknowledgment with the callback kept open for asynchronous results.
    pub fn no_result() -> Self {
        Self {
            status: Status::NoResult,
            message: Value::Null,
            keep_callback: true,
        }
    }

    /// Error reply. Errors with a wire code send the bare number, others
    /// their description.
    pub fn error(err: &CaptureError) -> Self {
        Self::error_message(match err.code() {
            Some(code) => json!(code),
            None => json!(err.to_string()),
        })
    }

    pub fn error_message(message: Value) -> Self {
        Self {
            status: Status::Error,
            message,
            keep_callback: false,
        }
    }

    pub fn keep_callback(mut self, keep: bool) -> Self {
        self.keep_callback = keep;
        self
    }
}

/// `{data}`, `{error}` or `{file}` payload of a capture event.
pub fn event_payload(event: &CaptureEvent) -> Value {
    match event {
        CaptureEvent::Data(data) => json!({ "data": data }),
        CaptureEvent::Error(message) => json!({ "error": message }),
        CaptureEvent::File(result) => json!({ "file": result.file_url }),
    }
}

impl From<&Reply> for PluginResult {
    fn from(reply: &Reply) -> Self {
        match reply {
            Reply::Pending => Self::no_result(),
            Reply::Event(event) => Self::ok(event_payload(event)).keep_callback(true),
            Reply::Final(None) => Self::ok(json!({})),
            Reply::Final(Some(event)) => Self::ok(event_payload(event)),
            Reply::Permission(granted) => Self::ok(json!(granted)),
            Reply::Success => Self::ok(Value::Null),
            Reply::Failed(err) => Self::error(err),
        }
    }
}

/// Receiver of plugin results on the host side.
pub trait HostCallback: Send + Sync {
    fn send_plugin_result(&self, result: PluginResult);
}

impl<F> HostCallback for F
where
    F: Fn(PluginResult) + Send + Sync,
{
    fn send_plugin_result(&self, result: PluginResult) {
        self(result)
    }
}

/// Adapts a host callback to the session's reply channel.
#[derive(Clone)]
pub struct CallbackContext {
    host: Arc<dyn HostCallback>,
}

impl CallbackContext {
    pub fn new(host: Arc<dyn HostCallback>) -> Self {
        Self { host }
    }

    pub fn send_plugin_result(&self, result: PluginResult) {
        self.host.send_plugin_result(result);
    }
}

impl ResultCallback for CallbackContext {
    fn send(&self, reply: Reply) {
        let result = PluginResult::from(&reply);
        log::trace!("plugin result: {:?}", result);
        self.host.send_plugin_result(result);
    }
}
