use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::models::config::{CaptureConfig, CaptureRequest, CaptureSink, SessionOptions, SinkKind};
use crate::models::diagnostics::CaptureDiagnostics;
use crate::models::error::CaptureError;
use crate::models::event::CaptureEvent;
use crate::models::state::SessionState;
use crate::session::worker::{self, WorkerEvent, WorkerHandle, WorkerMessage};
use crate::storage::wav_writer;
use crate::traits::audio_device::AudioBackend;
use crate::traits::permission::PermissionProvider;
use crate::traits::result_callback::{CallbackHandle, Reply};

/// Synchronous outcome of an accepted `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A worker is running.
    Recording(SinkKind),
    /// The user is being asked for microphone permission; the worker starts
    /// when the host reports the decision.
    AwaitingPermission,
}

/// A worker that is no longer the session's current one but has not exited.
struct Retired {
    worker: WorkerHandle,
    /// Kept for file workers so they can still deliver their terminal event.
    callback: Option<CallbackHandle>,
}

/// Capture session orchestrator.
///
/// Public operations run on the caller's thread. Worker events are queued on
/// a channel and delivered to the result callback by [`dispatch_events`] or
/// [`wait_for_event`], never from the worker thread.
///
/// ```text
/// start ──→ [permission] ──→ [CaptureWorker thread] ──events──→ channel
///                                                                  │
///            result callback ←── dispatch_events / wait_for_event ─┘
/// ```
///
/// [`dispatch_events`]: CaptureSession::dispatch_events
/// [`wait_for_event`]: CaptureSession::wait_for_event
pub struct CaptureSession<B: AudioBackend, P: PermissionProvider> {
    backend: Arc<B>,
    permissions: P,
    options: SessionOptions,
    state: SessionState,
    config: Option<CaptureConfig>,

    worker: Option<WorkerHandle>,
    retired: Vec<Retired>,

    result_callback: Option<CallbackHandle>,
    permission_callbacks: Vec<CallbackHandle>,
    pending_start: bool,

    events_tx: Sender<WorkerMessage>,
    events_rx: Receiver<WorkerMessage>,
    next_worker_id: u64,
}

impl<B: AudioBackend, P: PermissionProvider> CaptureSession<B, P> {
    pub fn new(backend: B, permissions: P) -> Self {
        Self::with_options(backend, permissions, SessionOptions::default())
    }

    pub fn with_options(backend: B, permissions: P, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            backend: Arc::new(backend),
            permissions,
            options,
            state: SessionState::Idle,
            config: None,
            worker: None,
            retired: Vec::new(),
            result_callback: None,
            permission_callbacks: Vec::new(),
            pending_start: false,
            events_tx,
            events_rx,
            next_worker_id: 1,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state.is_recording()
    }

    /// Configuration of the current or most recent recording.
    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Counters of the current worker, if one exists.
    pub fn diagnostics(&self) -> Option<CaptureDiagnostics> {
        self.worker.as_ref().map(|w| w.diagnostics())
    }

    /// Validate and remember `request` without starting anything.
    pub fn initialize(&mut self, request: CaptureRequest) -> Result<(), CaptureError> {
        let config = CaptureConfig::try_from(request)?;
        log::debug!("session initialized: {:?}", config);
        self.config = Some(config);
        Ok(())
    }

    /// Start recording from raw host arguments.
    pub fn start_request(
        &mut self,
        request: CaptureRequest,
        callback: CallbackHandle,
    ) -> Result<StartOutcome, CaptureError> {
        self.supersede();
        let config = CaptureConfig::try_from(request);
        self.begin(config, callback)
    }

    /// Start recording with `config`, superseding any recording in progress.
    ///
    /// On success the callback is retained and receives the recording's
    /// events. On error nothing is retained and the session is `Idle`.
    pub fn start(&mut self, config: CaptureConfig, callback: CallbackHandle) -> Result<StartOutcome, CaptureError> {
        self.supersede();
        let validated = config.validate().map(|()| config);
        self.begin(validated, callback)
    }

    fn begin(
        &mut self,
        config: Result<CaptureConfig, CaptureError>,
        callback: CallbackHandle,
    ) -> Result<StartOutcome, CaptureError> {
        let config = match config {
            Ok(config) => config,
            Err(e) => {
                log::warn!("start rejected: {}", e);
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        if let CaptureSink::File(path) = &config.sink {
            match wav_writer::remove_existing(path) {
                Ok(true) => log::info!("removed existing file at {}", path.display()),
                Ok(false) => {}
                Err(e) => log::warn!("{}", e),
            }
        }

        self.config = Some(config);
        self.result_callback = Some(callback);

        if self.permissions.has_permission() {
            let kind = self.spawn_worker()?;
            Ok(StartOutcome::Recording(kind))
        } else {
            log::info!("microphone permission required, requesting");
            self.pending_start = true;
            self.state = SessionState::AwaitingPermission;
            self.permissions.request_permission();
            Ok(StartOutcome::AwaitingPermission)
        }
    }

    /// Spawn a worker for the stored configuration and enter `Recording`.
    ///
    /// On failure the result callback is dropped and the session enters
    /// `Error`.
    fn spawn_worker(&mut self) -> Result<SinkKind, CaptureError> {
        let Some(config) = self.config.clone() else {
            return Err(CaptureError::InvalidState("no configuration to record with".into()));
        };
        let kind = config.sink_kind();
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        match worker::spawn(
            id,
            config,
            Arc::clone(&self.backend),
            self.options.spool_directory.clone(),
            self.events_tx.clone(),
        ) {
            Ok(handle) => {
                log::info!("recording started (worker {}, {:?})", id, kind);
                self.worker = Some(handle);
                self.state = SessionState::Recording(kind);
                Ok(kind)
            }
            Err(e) => {
                log::error!("failed to start capture worker: {}", e);
                self.result_callback = None;
                self.state = SessionState::Error(e.clone());
                Err(e)
            }
        }
    }

    /// Interrupt the current worker and any pending start.
    ///
    /// A stream caller gets its closing event now. A file worker keeps its
    /// callback and delivers its own terminal event when it exits.
    fn supersede(&mut self) {
        if self.pending_start {
            self.pending_start = false;
            if let Some(callback) = self.result_callback.take() {
                log::debug!("pending start superseded");
                callback.send(Reply::Final(None));
            }
        }

        let Some(worker) = self.worker.take() else {
            return;
        };
        let callback = self.result_callback.take();
        if !worker.is_interrupted() {
            log::info!("superseding worker {}", worker.id());
        }
        worker.interrupt();

        let callback = match (worker.sink_kind(), callback) {
            (SinkKind::Stream, Some(callback)) => {
                callback.send(Reply::Final(None));
                None
            }
            (_, callback) => callback,
        };
        self.retired.push(Retired { worker, callback });
    }

    /// Stop the current recording.
    ///
    /// Returns immediately. A stream caller receives its closing event before
    /// this returns; a file caller receives the finished file later.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let worker = match &self.worker {
            Some(worker) if !worker.is_interrupted() => worker,
            _ => return Err(CaptureError::InvalidState("no active recording".into())),
        };

        worker.interrupt();
        log::info!("stopping worker {}", worker.id());

        if worker.sink_kind() == SinkKind::Stream {
            if let Some(callback) = self.result_callback.take() {
                callback.send(Reply::Final(None));
            }
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Current grant status. Never prompts.
    pub fn check_permission(&self) -> bool {
        self.permissions.has_permission()
    }

    /// Returns the answer when it is already known. Otherwise prompts the
    /// user and answers later on `callback`. Every query still waiting is
    /// answered by the next decision.
    pub fn query_permission(&mut self, callback: CallbackHandle) -> Option<bool> {
        if self.permissions.has_permission() {
            return Some(true);
        }
        self.permission_callbacks.push(callback);
        self.permissions.request_permission();
        None
    }

    /// Report the user's decision on a permission prompt.
    ///
    /// Answers a pending query and resolves a pending start; either, both or
    /// neither may be waiting.
    pub fn on_permission_result(&mut self, granted: bool) {
        log::info!("microphone permission {}", if granted { "granted" } else { "denied" });

        for callback in self.permission_callbacks.drain(..) {
            callback.send(Reply::Permission(granted));
        }

        if !self.pending_start {
            return;
        }
        self.pending_start = false;

        if granted {
            if let Err(e) = self.spawn_worker() {
                if let Some(callback) = self.result_callback.take() {
                    callback.send(Reply::Failed(e));
                }
            }
        } else {
            self.state = SessionState::Error(CaptureError::PermissionDenied);
            if let Some(callback) = self.result_callback.take() {
                callback.send(Reply::Failed(CaptureError::PermissionDenied));
            }
        }
    }

    /// Deliver all queued worker events. Returns how many were handled.
    pub fn dispatch_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.events_rx.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for one worker event, then deliver it and
    /// anything else queued. Returns whether an event was handled.
    pub fn wait_for_event(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_message(message);
                self.dispatch_events();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        let WorkerMessage { worker_id, event } = message;

        let current = self.worker.as_ref().map(|w| w.id()) == Some(worker_id);
        if current {
            self.handle_current(event);
            return;
        }

        let Some(index) = self.retired.iter().position(|r| r.worker.id() == worker_id) else {
            log::debug!("dropping event from unknown worker {}", worker_id);
            return;
        };
        match event {
            WorkerEvent::Chunk(_) => {}
            WorkerEvent::Failed(e) => {
                if let Some(callback) = self.retired[index].callback.take() {
                    callback.send(Reply::Final(Some(CaptureEvent::Error(e.to_string()))));
                }
            }
            WorkerEvent::Finished(event) => {
                if let Some(callback) = self.retired[index].callback.take() {
                    callback.send(Reply::Final(Some(event)));
                }
            }
            WorkerEvent::Exited => {
                let mut retired = self.retired.swap_remove(index);
                retired.worker.join();
                if let Some(callback) = retired.callback {
                    callback.send(Reply::Final(Some(CaptureEvent::Error(
                        "capture ended without a result".into(),
                    ))));
                }
                log::debug!("retired worker {} exited", worker_id);
            }
        }
    }

    fn handle_current(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Chunk(event) => {
                if let Some(callback) = &self.result_callback {
                    callback.send(Reply::Event(event));
                }
            }
            WorkerEvent::Failed(e) => {
                if let Some(worker) = &self.worker {
                    if !worker.is_interrupted() {
                        self.state = SessionState::Error(e.clone());
                    }
                    // A failed worker is no longer stoppable.
                    worker.interrupt();
                }
                if let Some(callback) = self.result_callback.take() {
                    callback.send(Reply::Final(Some(CaptureEvent::Error(e.to_string()))));
                }
            }
            WorkerEvent::Finished(event) => {
                if let Some(callback) = self.result_callback.take() {
                    callback.send(Reply::Final(Some(event)));
                }
            }
            WorkerEvent::Exited => {
                if let Some(mut worker) = self.worker.take() {
                    worker.join();
                    log::debug!("worker {} exited", worker.id());
                }
                if self.state.is_recording() {
                    self.state = SessionState::Idle;
                }
                if let Some(callback) = self.result_callback.take() {
                    callback.send(Reply::Final(Some(CaptureEvent::Error(
                        "capture ended without a result".into(),
                    ))));
                }
            }
        }
    }

    /// Host teardown: interrupt every worker and wait for each to release its
    /// device. No results are delivered.
    pub fn on_destroy(&mut self) {
        log::info!("session destroyed");
        self.teardown();
        for mut worker in self.all_workers() {
            worker.join();
        }
        while self.events_rx.try_recv().is_ok() {}
    }

    /// Host reset: interrupt every worker without waiting. No results are
    /// delivered.
    pub fn on_reset(&mut self) {
        log::info!("session reset");
        self.teardown();
        for worker in self.all_workers() {
            self.retired.push(Retired { worker, callback: None });
        }
    }

    fn teardown(&mut self) {
        self.interrupt_all();
        self.result_callback = None;
        self.permission_callbacks.clear();
        self.pending_start = false;
        self.state = SessionState::Idle;
    }

    fn interrupt_all(&self) {
        self.worker.iter().for_each(WorkerHandle::interrupt);
        self.retired.iter().for_each(|r| r.worker.interrupt());
    }

    fn all_workers(&mut self) -> Vec<WorkerHandle> {
        self.retired
            .drain(..)
            .map(|r| r.worker)
            .chain(self.worker.take())
            .collect()
    }
}

impl<B: AudioBackend, P: PermissionProvider> Drop for CaptureSession<B, P> {
    fn drop(&mut self) {
        self.interrupt_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockPermissions, MockRead, ReplyLog};
    use std::path::PathBuf;
    use std::time::Instant;

    type Session = CaptureSession<MockBackend, MockPermissions>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn session(backend: &MockBackend, permissions: &MockPermissions) -> Session {
        init_logger();
        CaptureSession::new(backend.clone(), permissions.clone())
    }

    fn temp_path(suffix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("audio_input_session_{}{}", uuid::Uuid::new_v4(), suffix))
    }

    fn file_config(path: &std::path::Path) -> CaptureConfig {
        CaptureConfig {
            sample_rate_hz: 16000,
            buffer_size: 8,
            sink: CaptureSink::File(path.to_path_buf()),
            ..Default::default()
        }
    }

    fn stream_config() -> CaptureConfig {
        CaptureConfig { buffer_size: 8, ..Default::default() }
    }

    /// Deliver events until `done` holds. Panics after five seconds.
    fn pump_until(session: &mut Session, done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for session events");
            session.wait_for_event(Duration::from_millis(10));
        }
    }

    #[test]
    fn stop_without_recording_is_invalid_state() {
        let mut s = session(&MockBackend::new(), &MockPermissions::granted());
        assert!(matches!(s.stop(), Err(CaptureError::InvalidState(_))));
        assert_eq!(s.state(), &SessionState::Idle);
    }

    #[test]
    fn stream_session_delivers_chunks_then_closes() {
        let backend = MockBackend::new();
        backend.push_samples(vec![1, -2, 3]);
        backend.push_samples(vec![4]);
        backend.push_read(MockRead::Empty);
        backend.push_samples(vec![5, 6]);
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        let outcome = s.start(stream_config(), log.handle()).unwrap();
        assert_eq!(outcome, StartOutcome::Recording(SinkKind::Stream));
        assert!(s.is_capturing());

        pump_until(&mut s, || log.data_count() == 3);
        s.stop().unwrap();
        assert_eq!(log.last(), Some(Reply::Final(None)));
        assert_eq!(s.state(), &SessionState::Idle);

        pump_until(&mut s, || backend.counters().releases == 1);
        s.dispatch_events();

        let replies = log.replies();
        assert_eq!(replies[0], Reply::Event(CaptureEvent::Data("[1, -2, 3]".into())));
        assert_eq!(replies[1], Reply::Event(CaptureEvent::Data("[4]".into())));
        assert_eq!(replies[2], Reply::Event(CaptureEvent::Data("[5, 6]".into())));
        // nothing after the closing event
        assert_eq!(replies.len(), 4);
        assert_eq!(backend.counters().opens, 1);
        assert!(matches!(s.stop(), Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn non_file_url_is_rejected_before_opening_device() {
        let backend = MockBackend::new();
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();
        let request = CaptureRequest {
            file_url: Some("http://example.com/a.wav".into()),
            ..Default::default()
        };

        let err = s.start_request(request, log.handle()).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidUrl(_)));
        assert_eq!(err.code(), Some(30));
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(log.replies().is_empty());
        assert!(backend.last_params().is_none());
    }

    #[test]
    fn file_session_writes_wav() {
        let backend = MockBackend::new();
        backend.push_samples(vec![100, -100, 200, -200]);
        backend.push_read(MockRead::Empty);
        backend.push_samples(vec![1, 2]);

        let spool_dir = temp_path("_spool");
        std::fs::create_dir_all(&spool_dir).unwrap();
        let dest = temp_path(".wav");
        init_logger();
        let mut s = CaptureSession::with_options(
            backend.clone(),
            MockPermissions::granted(),
            SessionOptions { spool_directory: spool_dir.clone() },
        );
        let log = ReplyLog::new();

        s.start(file_config(&dest), log.handle()).unwrap();
        assert_eq!(s.state(), &SessionState::Recording(SinkKind::File));
        pump_until(&mut s, || backend.pending_reads() == 0);
        s.stop().unwrap();
        assert!(log.replies().is_empty(), "file callback stays silent until finalized");

        pump_until(&mut s, || log.terminal_count() == 1);
        let Some(Reply::Final(Some(CaptureEvent::File(result)))) = log.last() else {
            panic!("expected file event, got {:?}", log.replies());
        };
        assert_eq!(result.file_path, dest);
        assert_eq!(result.data_bytes, 12);
        assert_eq!(result.checksum.len(), 64);

        let mut reader = hound::WavReader::open(&dest).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -100, 200, -200, 1, 2]);

        pump_until(&mut s, || backend.counters().releases == 1);
        assert_eq!(std::fs::read_dir(&spool_dir).unwrap().count(), 0);
        assert_eq!(log.terminal_count(), 1);

        let _ = std::fs::remove_file(&dest);
        let _ = std::fs::remove_dir(&spool_dir);
    }

    #[test]
    fn existing_destination_is_removed_on_start() {
        let dest = temp_path(".wav");
        std::fs::write(&dest, b"stale").unwrap();
        let mut s = session(&MockBackend::new(), &MockPermissions::denied());

        let outcome = s.start(file_config(&dest), ReplyLog::new().handle()).unwrap();
        assert_eq!(outcome, StartOutcome::AwaitingPermission);
        assert!(!dest.exists());
    }

    #[test]
    fn denial_fails_pending_start() {
        let backend = MockBackend::new();
        let permissions = MockPermissions::denied();
        let mut s = session(&backend, &permissions);
        let log = ReplyLog::new();

        assert_eq!(s.start(stream_config(), log.handle()).unwrap(), StartOutcome::AwaitingPermission);
        assert!(s.state().is_awaiting_permission());
        assert_eq!(permissions.requests(), 1);

        s.on_permission_result(false);
        assert_eq!(s.state(), &SessionState::Error(CaptureError::PermissionDenied));
        assert_eq!(log.replies(), vec![Reply::Failed(CaptureError::PermissionDenied)]);
        assert_eq!(backend.counters().opens, 0);
    }

    #[test]
    fn grant_starts_pending_recording() {
        let backend = MockBackend::new();
        backend.push_samples(vec![7, 8]);
        let permissions = MockPermissions::denied();
        let mut s = session(&backend, &permissions);
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        permissions.set_granted(true);
        s.on_permission_result(true);
        assert_eq!(s.state(), &SessionState::Recording(SinkKind::Stream));

        pump_until(&mut s, || log.data_count() == 1);
        assert_eq!(log.replies()[0], Reply::Event(CaptureEvent::Data("[7, 8]".into())));
        s.stop().unwrap();
    }

    #[test]
    fn permission_query_does_not_start_recording() {
        let backend = MockBackend::new();
        let mut s = session(&backend, &MockPermissions::denied());
        let query = ReplyLog::new();

        assert_eq!(s.query_permission(query.handle()), None);
        s.on_permission_result(true);

        assert_eq!(query.replies(), vec![Reply::Permission(true)]);
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(backend.last_params().is_none());
    }

    #[test]
    fn permission_result_resolves_query_and_start() {
        let backend = MockBackend::new();
        let permissions = MockPermissions::denied();
        let mut s = session(&backend, &permissions);
        let query = ReplyLog::new();
        let recording = ReplyLog::new();

        s.start(stream_config(), recording.handle()).unwrap();
        s.query_permission(query.handle());
        permissions.set_granted(true);
        s.on_permission_result(true);

        assert_eq!(query.replies(), vec![Reply::Permission(true)]);
        assert!(recording.replies().is_empty());
        assert!(s.is_capturing());
        s.on_destroy();
    }

    #[test]
    fn every_pending_query_is_answered() {
        let permissions = MockPermissions::denied();
        let mut s = session(&MockBackend::new(), &permissions);
        let first = ReplyLog::new();
        let second = ReplyLog::new();

        assert_eq!(s.query_permission(first.handle()), None);
        assert_eq!(s.query_permission(second.handle()), None);
        s.on_permission_result(false);

        assert_eq!(first.replies(), vec![Reply::Permission(false)]);
        assert_eq!(second.replies(), vec![Reply::Permission(false)]);

        s.on_permission_result(true);
        assert_eq!(first.replies().len(), 1);
    }

    #[test]
    fn check_permission_never_prompts() {
        let permissions = MockPermissions::denied();
        let mut s = session(&MockBackend::new(), &permissions);
        assert!(!s.check_permission());
        assert!(!s.check_permission());
        assert_eq!(permissions.requests(), 0);

        permissions.set_granted(true);
        assert!(s.check_permission());
        assert_eq!(s.query_permission(ReplyLog::new().handle()), Some(true));
        assert_eq!(permissions.requests(), 0);
    }

    #[test]
    fn second_start_supersedes_first() {
        let backend = MockBackend::new();
        backend.push_samples(vec![1]);
        let mut s = session(&backend, &MockPermissions::granted());
        let first = ReplyLog::new();
        let second = ReplyLog::new();

        s.start(stream_config(), first.handle()).unwrap();
        pump_until(&mut s, || first.data_count() == 1);

        s.start(stream_config(), second.handle()).unwrap();
        assert_eq!(first.last(), Some(Reply::Final(None)));
        pump_until(&mut s, || backend.counters().releases == 1);
        backend.push_samples(vec![2]);
        pump_until(&mut s, || second.data_count() == 1);

        s.stop().unwrap();
        pump_until(&mut s, || backend.counters().releases == 2);
        s.dispatch_events();

        assert_eq!(backend.counters().opens, 2);
        assert_eq!(first.terminal_count(), 1);
        assert_eq!(second.terminal_count(), 1);
        assert_eq!(first.data_count(), 1);
        assert_eq!(second.replies()[0], Reply::Event(CaptureEvent::Data("[2]".into())));
    }

    #[test]
    fn superseded_file_session_delivers_its_own_file() {
        let backend = MockBackend::new();
        backend.push_samples(vec![9, 9]);
        let dest = temp_path(".wav");
        let mut s = session(&backend, &MockPermissions::granted());
        let file_log = ReplyLog::new();
        let stream_log = ReplyLog::new();

        s.start(file_config(&dest), file_log.handle()).unwrap();
        pump_until(&mut s, || backend.pending_reads() == 0);
        s.start(stream_config(), stream_log.handle()).unwrap();

        pump_until(&mut s, || file_log.terminal_count() == 1);
        assert!(matches!(file_log.last(), Some(Reply::Final(Some(CaptureEvent::File(_))))));
        assert!(stream_log.replies().iter().all(|r| r.keeps_callback()));

        s.stop().unwrap();
        pump_until(&mut s, || backend.counters().releases == 2);
        assert_eq!(file_log.terminal_count(), 1);
        let _ = std::fs::remove_file(&dest);
    }

    #[test]
    fn missing_spool_directory_still_releases_device() {
        let backend = MockBackend::new();
        let dest = temp_path(".wav");
        init_logger();
        let mut s = CaptureSession::with_options(
            backend.clone(),
            MockPermissions::granted(),
            SessionOptions { spool_directory: temp_path("_missing") },
        );
        let log = ReplyLog::new();

        s.start(file_config(&dest), log.handle()).unwrap();
        pump_until(&mut s, || backend.counters().releases == 1 && log.terminal_count() == 1);
        s.dispatch_events();

        assert!(matches!(log.last(), Some(Reply::Final(Some(CaptureEvent::Error(_))))));
        assert_eq!(log.terminal_count(), 1);
        assert!(matches!(s.state(), SessionState::Error(CaptureError::Storage(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn unwritable_destination_reports_one_error_and_cleans_spool() {
        let backend = MockBackend::new();
        backend.push_samples(vec![10, 20, 30]);
        let spool_dir = temp_path("_spool");
        std::fs::create_dir_all(&spool_dir).unwrap();
        let dest = temp_path("_absent_dir").join("take.wav");
        init_logger();
        let mut s = CaptureSession::with_options(
            backend.clone(),
            MockPermissions::granted(),
            SessionOptions { spool_directory: spool_dir.clone() },
        );
        let log = ReplyLog::new();

        s.start(file_config(&dest), log.handle()).unwrap();
        pump_until(&mut s, || backend.pending_reads() == 0);
        s.stop().unwrap();
        pump_until(&mut s, || log.terminal_count() == 1 && backend.counters().releases == 1);
        s.dispatch_events();

        assert!(
            matches!(log.last(), Some(Reply::Final(Some(CaptureEvent::Error(_))))),
            "{:?}",
            log.replies()
        );
        assert_eq!(log.terminal_count(), 1);
        assert_eq!(backend.counters().releases, 1);
        assert_eq!(std::fs::read_dir(&spool_dir).unwrap().count(), 0);
        assert!(!dest.exists());

        let _ = std::fs::remove_dir(&spool_dir);
    }

    #[test]
    fn worker_panic_still_delivers_terminal_error() {
        let backend = MockBackend::new();
        backend.push_samples(vec![1, 2]);
        backend.push_read(MockRead::Panic("driver bug".into()));
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(file_config(&temp_path(".wav")), log.handle()).unwrap();
        pump_until(&mut s, || log.terminal_count() == 1);
        while s.wait_for_event(Duration::from_millis(50)) {}
        assert!(s.diagnostics().is_none());

        assert_eq!(
            log.last(),
            Some(Reply::Final(Some(CaptureEvent::Error(
                "device error: capture worker panicked".into()
            ))))
        );
        assert_eq!(
            s.state(),
            &SessionState::Error(CaptureError::Device("capture worker panicked".into()))
        );
        assert!(matches!(s.stop(), Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn open_failure_is_terminal() {
        for config in [stream_config(), file_config(&temp_path(".wav"))] {
            let backend = MockBackend::new();
            backend.fail_open(CaptureError::DeviceNotAvailable);
            let mut s = session(&backend, &MockPermissions::granted());
            let log = ReplyLog::new();

            s.start(config, log.handle()).unwrap();
            pump_until(&mut s, || log.terminal_count() == 1);

            assert_eq!(
                log.last(),
                Some(Reply::Final(Some(CaptureEvent::Error("device not available".into()))))
            );
            assert_eq!(s.state(), &SessionState::Error(CaptureError::DeviceNotAvailable));
            assert_eq!(backend.counters().releases, 0);
        }
    }

    #[test]
    fn start_failure_releases_opened_device() {
        let backend = MockBackend::new();
        backend.fail_start(CaptureError::Device("busy".into()));
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        pump_until(&mut s, || log.terminal_count() == 1 && backend.counters().releases == 1);

        let counters = backend.counters();
        assert_eq!((counters.opens, counters.starts, counters.stops), (1, 0, 0));
        assert_eq!(s.state(), &SessionState::Error(CaptureError::Device("busy".into())));
    }

    #[test]
    fn fatal_read_ends_recording() {
        let backend = MockBackend::new();
        backend.push_samples(vec![1]);
        backend.push_read(MockRead::Fatal("unplugged".into()));
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        pump_until(&mut s, || log.terminal_count() == 1);
        pump_until(&mut s, || backend.counters().releases == 1);
        s.dispatch_events();

        assert_eq!(s.state(), &SessionState::Error(CaptureError::Device("unplugged".into())));
        assert_eq!(log.data_count(), 1);
        assert_eq!(backend.counters().stops, 1);
        assert!(matches!(s.stop(), Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn transient_read_error_is_reported_and_loop_continues() {
        let backend = MockBackend::new();
        backend.push_read(MockRead::Transient("overrun".into()));
        backend.push_samples(vec![3]);
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        pump_until(&mut s, || log.data_count() == 1);

        assert_eq!(
            log.replies()[0],
            Reply::Event(CaptureEvent::Error("read failed: overrun".into()))
        );
        let diagnostics = s.diagnostics().unwrap();
        assert_eq!(diagnostics.non_fatal_errors, 1);
        assert_eq!(diagnostics.chunks_read, 1);
        assert!(s.is_capturing());
        s.stop().unwrap();
    }

    #[test]
    fn device_buffer_is_five_read_chunks_or_device_minimum() {
        for (min, expected) in [(3584, 10240), (20000, 20000)] {
            let backend = MockBackend::new().with_min_buffer_size(min);
            let mut s = session(&backend, &MockPermissions::granted());
            let config = CaptureConfig { buffer_size: 1024, ..Default::default() };

            s.start(config, ReplyLog::new().handle()).unwrap();
            pump_until(&mut s, || backend.counters().opens == 1);
            assert_eq!(backend.last_params().unwrap().buffer_size_bytes, expected);
            s.on_destroy();
        }
    }

    #[test]
    fn destroy_waits_for_release_without_replies() {
        let backend = MockBackend::new();
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        s.on_destroy();

        assert_eq!(backend.counters().releases, 1);
        assert_eq!(s.state(), &SessionState::Idle);
        assert_eq!(s.dispatch_events(), 0);
        assert!(log.replies().is_empty());
    }

    #[test]
    fn reset_interrupts_without_replies() {
        let backend = MockBackend::new();
        let mut s = session(&backend, &MockPermissions::granted());
        let log = ReplyLog::new();

        s.start(stream_config(), log.handle()).unwrap();
        s.on_reset();
        assert_eq!(s.state(), &SessionState::Idle);
        assert!(matches!(s.stop(), Err(CaptureError::InvalidState(_))));

        pump_until(&mut s, || backend.counters().releases == 1);
        s.dispatch_events();
        assert!(log.replies().is_empty());
    }

    #[test]
    fn initialize_validates_without_starting() {
        let backend = MockBackend::new();
        let mut s = session(&backend, &MockPermissions::granted());

        let request = CaptureRequest { sample_rate: 22050, ..Default::default() };
        s.initialize(request).unwrap();
        assert_eq!(s.config().map(|c| c.sample_rate_hz), Some(22050));
        assert_eq!(s.state(), &SessionState::Idle);

        let bad = CaptureRequest { file_url: Some("file://host/a.wav".into()), ..Default::default() };
        assert!(matches!(s.initialize(bad), Err(CaptureError::InvalidUrl(_))));
        assert!(backend.last_params().is_none());
    }
}
