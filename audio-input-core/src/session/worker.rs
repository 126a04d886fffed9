use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::models::config::{CaptureConfig, CaptureSink, SinkKind};
use crate::models::diagnostics::CaptureDiagnostics;
use crate::models::error::{CaptureError, ReadError};
use crate::models::event::CaptureEvent;
use crate::models::recording_result::RecordingResult;
use crate::processing::pcm_buffer::PcmBuffer;
use crate::processing::wav_format::WavSpec;
use crate::storage::pcm_spool::PcmSpool;
use crate::storage::wav_writer;
use crate::traits::audio_device::{AudioBackend, AudioDevice, DeviceParams};

/// Message posted by a worker to its session, tagged with the worker id.
#[derive(Debug)]
pub(crate) struct WorkerMessage {
    pub worker_id: u64,
    pub event: WorkerEvent,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// A data chunk or a non-fatal error.
    Chunk(CaptureEvent),
    /// Capture could not run or could not continue.
    Failed(CaptureError),
    /// Terminal event of a file session, after finalization.
    Finished(CaptureEvent),
    /// The thread is done and the device has been released. Always last.
    Exited,
}

/// Handle to one single-shot capture worker.
///
/// Interrupting is advisory: the worker checks the flag before every read, so
/// it stops within one read call. Dropping the handle does not stop the
/// worker.
pub struct WorkerHandle {
    id: u64,
    sink: SinkKind,
    interrupted: Arc<AtomicBool>,
    diagnostics: Arc<Mutex<CaptureDiagnostics>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.sink
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.diagnostics.lock().clone()
    }

    /// Wait for the worker thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("capture worker {} panicked", self.id);
            }
        }
    }
}

/// Start a worker thread for `config`.
pub(crate) fn spawn<B: AudioBackend>(
    id: u64,
    config: CaptureConfig,
    backend: Arc<B>,
    spool_directory: PathBuf,
    events: Sender<WorkerMessage>,
) -> Result<WorkerHandle, CaptureError> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let diagnostics = Arc::new(Mutex::new(CaptureDiagnostics::default()));
    let sink = config.sink_kind();

    let worker = CaptureWorker {
        id,
        config,
        backend,
        spool_directory,
        interrupted: Arc::clone(&interrupted),
        diagnostics: Arc::clone(&diagnostics),
        events,
    };

    let thread = thread::Builder::new()
        .name("audio-input-capture".into())
        .spawn(move || worker.run())
        .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {}", e)))?;

    Ok(WorkerHandle {
        id,
        sink,
        interrupted,
        diagnostics,
        thread: Some(thread),
    })
}

/// Posts `Exited` when the worker thread ends. If the thread is unwinding,
/// a failure is posted first so the session still sees a terminal event.
struct ExitNotice {
    worker_id: u64,
    events: Sender<WorkerMessage>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("capture worker {} panicked", self.worker_id);
            let _ = self.events.send(WorkerMessage {
                worker_id: self.worker_id,
                event: WorkerEvent::Failed(CaptureError::Device("capture worker panicked".into())),
            });
        }
        let _ = self.events.send(WorkerMessage {
            worker_id: self.worker_id,
            event: WorkerEvent::Exited,
        });
    }
}

/// Where each chunk goes inside the read loop.
enum ChunkSink {
    Stream,
    File(PcmSpool),
}

struct CaptureWorker<B> {
    id: u64,
    config: CaptureConfig,
    backend: Arc<B>,
    spool_directory: PathBuf,
    interrupted: Arc<AtomicBool>,
    diagnostics: Arc<Mutex<CaptureDiagnostics>>,
    events: Sender<WorkerMessage>,
}

impl<B: AudioBackend> CaptureWorker<B> {
    /// Sequence:
    /// 1. Open the device (internal buffer = max(5 x read chunk, device minimum))
    /// 2. Start recording, open the spool for file sessions
    /// 3. Read until interrupted or the device fails
    /// 4. Stop and release the device
    /// 5. Finalize the WAV file (file sessions)
    fn run(self) {
        let _exit = ExitNotice {
            worker_id: self.id,
            events: self.events.clone(),
        };
        log::debug!("capture worker {} starting ({:?})", self.id, self.config.sink_kind());

        let mut device = match self.open_device() {
            Ok(device) => device,
            Err(e) => {
                log::error!("capture worker {} could not open device: {}", self.id, e);
                self.post(WorkerEvent::Failed(e));
                return;
            }
        };

        let outcome = self.capture(device.as_mut());

        if device.is_recording() {
            if let Err(e) = device.stop() {
                log::warn!("capture worker {} failed to stop device: {}", self.id, e);
            }
        }
        device.release();
        log::debug!("capture worker {} released device", self.id);

        match (outcome, &self.config.sink) {
            (Err(e), _) => {
                log::error!("capture worker {} failed: {}", self.id, e);
                self.post(WorkerEvent::Failed(e));
            }
            (Ok(ChunkSink::File(spool)), CaptureSink::File(dest)) => self.finalize(spool, dest),
            (Ok(_), _) => {}
        }
    }

    fn open_device(&self) -> Result<Box<dyn AudioDevice>, CaptureError> {
        let min = self.backend.min_buffer_size(
            self.config.sample_rate_hz,
            self.config.channel_count,
            self.config.sample_format,
        )?;
        let params = DeviceParams::for_config(&self.config, min);
        log::debug!(
            "opening device: {:?} {} Hz x{} {} buffer={}B (min {}B)",
            params.source,
            params.sample_rate,
            params.channels,
            params.format,
            params.buffer_size_bytes,
            min
        );
        self.backend.open(&params)
    }

    /// The read loop. On success returns the sink so a spool can be finalized.
    fn capture(&self, device: &mut dyn AudioDevice) -> Result<ChunkSink, CaptureError> {
        device.start_recording()?;

        let mut sink = match &self.config.sink {
            CaptureSink::Stream => ChunkSink::Stream,
            CaptureSink::File(_) => ChunkSink::File(PcmSpool::create(&self.spool_directory)?),
        };
        let mut buffer = PcmBuffer::new(self.config.sample_format, self.config.buffer_size as usize);

        while !self.interrupted.load(Ordering::SeqCst) {
            let count = match device.read(&mut buffer) {
                Ok(0) => {
                    self.diagnostics.lock().empty_reads += 1;
                    continue;
                }
                Ok(n) => n.min(buffer.len()),
                Err(ReadError::Transient(msg)) => {
                    self.report(format!("read failed: {}", msg));
                    continue;
                }
                Err(ReadError::Fatal(msg)) => return Err(CaptureError::Device(msg)),
            };

            {
                let mut d = self.diagnostics.lock();
                d.chunks_read += 1;
                d.bytes_captured += (count * self.config.sample_format.bytes_per_sample()) as u64;
            }

            match &mut sink {
                ChunkSink::Stream => match buffer.encode(count) {
                    Ok(text) => {
                        if !self.post(WorkerEvent::Chunk(CaptureEvent::Data(text))) {
                            log::debug!("capture worker {} lost its session, stopping", self.id);
                            break;
                        }
                    }
                    Err(e) => self.report(e.to_string()),
                },
                ChunkSink::File(spool) => {
                    if let Err(e) = spool.append(&buffer.le_bytes(count)) {
                        self.report(e.to_string());
                    }
                }
            }
        }

        Ok(sink)
    }

    /// Turn the spool into the destination WAV and post the terminal event.
    /// The spool file is removed whatever the outcome.
    fn finalize(&self, mut spool: PcmSpool, dest: &Path) {
        let event = match self.write_file(&mut spool, dest) {
            Ok(result) => {
                log::info!(
                    "recording finalized: {} ({} bytes, {:.2}s)",
                    result.file_path.display(),
                    result.data_bytes,
                    result.duration_secs
                );
                CaptureEvent::File(result)
            }
            Err(e) => {
                log::error!("failed to finalize {}: {}", dest.display(), e);
                CaptureEvent::Error(e.to_string())
            }
        };
        drop(spool);
        self.post(WorkerEvent::Finished(event));
    }

    fn write_file(&self, spool: &mut PcmSpool, dest: &Path) -> Result<RecordingResult, CaptureError> {
        spool.close()?;
        let spec = WavSpec::from(&self.config);
        let data_bytes = wav_writer::write_wav(spool.path(), dest, &spec)?;
        if data_bytes != spool.bytes_written() {
            log::warn!(
                "spool holds {} bytes but {} were appended",
                data_bytes,
                spool.bytes_written()
            );
        }
        let checksum = wav_writer::sha256_file(dest)?;
        Ok(RecordingResult::new(dest.to_path_buf(), data_bytes, spec.byte_rate()?, checksum))
    }

    /// Post a non-fatal error; the loop keeps going.
    fn report(&self, message: String) {
        log::warn!("capture worker {}: {}", self.id, message);
        self.diagnostics.lock().non_fatal_errors += 1;
        self.post(WorkerEvent::Chunk(CaptureEvent::Error(message)));
    }

    /// Returns false once the session side of the channel is gone.
    fn post(&self, event: WorkerEvent) -> bool {
        self.events
            .send(WorkerMessage {
                worker_id: self.id,
                event,
            })
            .is_ok()
    }
}
