use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};

use audio_input_core::{
    AudioBackend, CallbackHandle, CaptureRequest, CaptureSession, PermissionProvider, Reply, ResultCallback,
    SessionOptions, SessionState,
};

use crate::error::BridgeError;
use crate::plugin_result::{CallbackContext, HostCallback, PluginResult};

/// Longest time `wait_for_event` holds the session lock in one go.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Positional argument names of `initialize` and `start`.
const CAPTURE_ARGS: [&str; 6] = ["sampleRate", "bufferSize", "channels", "format", "audioSourceType", "fileUrl"];

/// Actions accepted by [`AudioInputPlugin::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Initialize,
    Start,
    Stop,
    CheckMicrophonePermission,
    GetMicrophonePermission,
}

impl FromStr for Action {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(Self::Initialize),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "checkMicrophonePermission" => Ok(Self::CheckMicrophonePermission),
            "getMicrophonePermission" => Ok(Self::GetMicrophonePermission),
            other => Err(BridgeError::UnknownAction(other.to_string())),
        }
    }
}

/// Build a [`CaptureRequest`] from positional host arguments.
///
/// Missing and `null` arguments take their defaults; a `null` file URL
/// selects the stream sink.
pub fn parse_capture_args(args: &Value) -> Result<CaptureRequest, BridgeError> {
    let list = args.as_array().ok_or(BridgeError::NotAnArray)?;
    let fields: Map<String, Value> = CAPTURE_ARGS
        .iter()
        .zip(list)
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Host-facing command surface of one capture session.
///
/// Callbacks are invoked while the session lock is held and must not call
/// back into the plugin.
pub struct AudioInputPlugin<B: AudioBackend, P: PermissionProvider> {
    session: Mutex<CaptureSession<B, P>>,
}

impl<B: AudioBackend, P: PermissionProvider> AudioInputPlugin<B, P> {
    pub fn new(backend: B, permissions: P) -> Self {
        Self::with_options(backend, permissions, SessionOptions::default())
    }

    pub fn with_options(backend: B, permissions: P, options: SessionOptions) -> Self {
        Self {
            session: Mutex::new(CaptureSession::with_options(backend, permissions, options)),
        }
    }

    /// Run `action`. Every recognised action replies at least once on
    /// `callback`; failures are also returned.
    pub fn execute(&self, action: &str, args: &Value, callback: Arc<dyn HostCallback>) -> Result<(), BridgeError> {
        let action: Action = action.parse()?;
        log::debug!("execute {:?}", action);

        let context = CallbackContext::new(callback);
        let result = self.run(action, args, &context);
        if let Err(e) = &result {
            log::warn!("{:?} failed: {}", action, e);
            context.send_plugin_result(match e {
                BridgeError::Capture(err) => PluginResult::error(err),
                other => PluginResult::error_message(match other.code() {
                    Some(code) => Value::from(code),
                    None => Value::from(other.to_string()),
                }),
            });
        }
        result
    }

    fn run(&self, action: Action, args: &Value, context: &CallbackContext) -> Result<(), BridgeError> {
        let mut session = self.session.lock();
        match action {
            Action::Initialize => {
                session.initialize(parse_capture_args(args)?)?;
                context.send(Reply::Success);
            }
            Action::Start => {
                let request = parse_capture_args(args)?;
                let handle: CallbackHandle = Arc::new(context.clone());
                session.start_request(request, handle)?;
                context.send(Reply::Pending);
            }
            Action::Stop => {
                session.stop()?;
                context.send(Reply::Success);
            }
            Action::CheckMicrophonePermission => {
                context.send(Reply::Permission(session.check_permission()));
            }
            Action::GetMicrophonePermission => {
                let handle: CallbackHandle = Arc::new(context.clone());
                match session.query_permission(handle) {
                    Some(granted) => context.send(Reply::Permission(granted)),
                    None => context.send(Reply::Pending),
                }
            }
        }
        Ok(())
    }

    /// Host report of the user's answer to a permission prompt.
    pub fn on_request_permission_result(&self, granted: bool) {
        self.session.lock().on_permission_result(granted);
    }

    pub fn on_destroy(&self) {
        self.session.lock().on_destroy();
    }

    pub fn on_reset(&self) {
        self.session.lock().on_reset();
    }

    /// Deliver queued capture events. Call from the host's event loop.
    pub fn dispatch_events(&self) -> usize {
        self.session.lock().dispatch_events()
    }

    /// Block up to `timeout` for capture events and deliver them.
    ///
    /// Waits in short slices and releases the lock between them, so commands
    /// from other threads are not held up by a waiting event loop.
    pub fn wait_for_event(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut session = self.session.lock();
            let handled = session.wait_for_event(remaining.min(WAIT_SLICE));
            MutexGuard::unlock_fair(session);
            if handled {
                return true;
            }
            if remaining <= WAIT_SLICE {
                return false;
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state().clone()
    }
}
