//! # audio-input-bridge
//!
//! Host command surface for `audio-input-core`.
//!
//! The host calls [`AudioInputPlugin::execute`] with an action name, a JSON
//! argument array and a callback. Replies are [`PluginResult`]s: a status, a
//! JSON message and a keep-callback flag. Recording events arrive on the
//! `start` callback as `{data}`, `{error}` or `{file}` objects, errors as the
//! bare numeric codes 20 (permission denied), 30 (invalid url) and 40
//! (invalid state).
//!
//! ```text
//! host ──execute(action, args, cb)──→ AudioInputPlugin ──→ CaptureSession
//!   ↑                                                          │
//!   └──── PluginResult ←── CallbackContext ←── Reply ←─────────┘
//! ```

pub mod error;
pub mod plugin;
pub mod plugin_result;

pub use error::BridgeError;
pub use plugin::{parse_capture_args, Action, AudioInputPlugin};
pub use plugin_result::{event_payload, CallbackContext, HostCallback, PluginResult, Status};
