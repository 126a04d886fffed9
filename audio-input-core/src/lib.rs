//! # audio-input-core
//!
//! Microphone capture sessions with a stream or WAV file sink.
//!
//! A [`CaptureSession`] owns the permission flow and the state machine. Each
//! recording runs on a dedicated capture worker thread that owns the input
//! device, reads fixed-size PCM chunks and either encodes them as `data`
//! events or spools them to disk for WAV finalization. Platform drivers plug
//! in through [`AudioBackend`] and [`PermissionProvider`].
//!
//! ## Architecture
//!
//! ```text
//! audio-input-core (this crate)
//! ├── traits/       ← AudioBackend, AudioDevice, PermissionProvider, ResultCallback
//! ├── models/       ← CaptureError, CaptureConfig, SessionState, CaptureEvent, RecordingResult
//! ├── processing/   ← PcmBuffer, WAV header generation
//! ├── session/      ← CaptureSession (state machine), capture worker
//! ├── storage/      ← PCM spool, WAV container writer
//! └── mock          ← in-memory backend and permissions
//! ```

pub mod mock;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{
    AudioSourceType, CaptureConfig, CaptureRequest, CaptureSink, SampleFormat, SessionOptions, SinkKind,
};
pub use models::diagnostics::CaptureDiagnostics;
pub use models::error::{CaptureError, ReadError, INVALID_STATE_ERROR, INVALID_URL_ERROR, PERMISSION_DENIED_ERROR};
pub use models::event::CaptureEvent;
pub use models::recording_result::RecordingResult;
pub use models::state::SessionState;
pub use processing::pcm_buffer::PcmBuffer;
pub use session::capture_session::{CaptureSession, StartOutcome};
pub use session::worker::WorkerHandle;
pub use traits::audio_device::{AudioBackend, AudioDevice, DeviceParams};
pub use traits::permission::PermissionProvider;
pub use traits::result_callback::{CallbackHandle, Reply, ResultCallback};
