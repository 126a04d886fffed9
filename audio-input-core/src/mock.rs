//! In-memory audio backend and permission provider.
//!
//! Used by the test suites and by hosts that want to exercise the command
//! surface without a microphone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::SampleFormat;
use crate::models::error::{CaptureError, ReadError};
use crate::processing::pcm_buffer::PcmBuffer;
use crate::traits::audio_device::{AudioBackend, AudioDevice, DeviceParams};
use crate::traits::permission::PermissionProvider;
use crate::traits::result_callback::{CallbackHandle, Reply, ResultCallback};

const DEFAULT_MIN_BUFFER_SIZE: usize = 3584;
const DEFAULT_READ_DELAY: Duration = Duration::from_millis(2);

/// One scripted outcome of `AudioDevice::read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Samples to copy into the buffer, truncated to its length.
    Samples(Vec<i16>),
    Empty,
    Transient(String),
    Fatal(String),
    /// Panic inside the read call.
    Panic(String),
}

/// Lifecycle call counts across every device opened by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounters {
    pub opens: usize,
    pub starts: usize,
    pub stops: usize,
    pub releases: usize,
    pub reads: usize,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<MockRead>,
    open_error: Option<CaptureError>,
    start_error: Option<CaptureError>,
    min_buffer_size: usize,
    read_delay: Duration,
    counters: MockCounters,
    last_params: Option<DeviceParams>,
}

/// Backend whose devices replay a shared read script.
///
/// Once the script runs out, reads sleep for the read delay and return zero
/// samples, so a worker idles until it is interrupted.
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                open_error: None,
                start_error: None,
                min_buffer_size: DEFAULT_MIN_BUFFER_SIZE,
                read_delay: DEFAULT_READ_DELAY,
                counters: MockCounters::default(),
                last_params: None,
            })),
        }
    }

    pub fn with_min_buffer_size(self, bytes: usize) -> Self {
        self.state.lock().min_buffer_size = bytes;
        self
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.state.lock().read_delay = delay;
    }

    pub fn push_read(&self, read: MockRead) {
        self.state.lock().script.push_back(read);
    }

    pub fn push_samples(&self, samples: impl Into<Vec<i16>>) {
        self.push_read(MockRead::Samples(samples.into()));
    }

    /// Make every subsequent `open` fail with `error`.
    pub fn fail_open(&self, error: CaptureError) {
        self.state.lock().open_error = Some(error);
    }

    /// Make every subsequent `start_recording` fail with `error`.
    pub fn fail_start(&self, error: CaptureError) {
        self.state.lock().start_error = Some(error);
    }

    pub fn counters(&self) -> MockCounters {
        self.state.lock().counters
    }

    pub fn last_params(&self) -> Option<DeviceParams> {
        self.state.lock().last_params.clone()
    }

    /// Reads still queued.
    pub fn pending_reads(&self) -> usize {
        self.state.lock().script.len()
    }
}

impl AudioBackend for MockBackend {
    fn min_buffer_size(&self, _sample_rate: u32, _channels: u16, _format: SampleFormat) -> Result<usize, CaptureError> {
        Ok(self.state.lock().min_buffer_size)
    }

    fn open(&self, params: &DeviceParams) -> Result<Box<dyn AudioDevice>, CaptureError> {
        let mut state = self.state.lock();
        state.last_params = Some(params.clone());
        if let Some(err) = state.open_error.clone() {
            return Err(err);
        }
        state.counters.opens += 1;
        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
            recording: false,
        }))
    }
}

pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    recording: bool,
}

impl AudioDevice for MockDevice {
    fn start_recording(&mut self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if let Some(err) = state.start_error.clone() {
            return Err(err);
        }
        state.counters.starts += 1;
        self.recording = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut PcmBuffer) -> Result<usize, ReadError> {
        let (next, delay) = {
            let mut state = self.state.lock();
            state.counters.reads += 1;
            (state.script.pop_front(), state.read_delay)
        };

        match next {
            Some(MockRead::Samples(samples)) => {
                let n = samples.len().min(buffer.len());
                match buffer {
                    PcmBuffer::Pcm8(out) => {
                        for (dst, src) in out.iter_mut().zip(&samples[..n]) {
                            *dst = *src as u8;
                        }
                    }
                    PcmBuffer::Pcm16(out) => out[..n].copy_from_slice(&samples[..n]),
                }
                Ok(n)
            }
            Some(MockRead::Empty) => Ok(0),
            Some(MockRead::Transient(msg)) => Err(ReadError::Transient(msg)),
            Some(MockRead::Fatal(msg)) => Err(ReadError::Fatal(msg)),
            Some(MockRead::Panic(msg)) => panic!("{}", msg),
            None => {
                thread::sleep(delay);
                Ok(0)
            }
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.state.lock().counters.stops += 1;
        self.recording = false;
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.state.lock().counters.releases += 1;
    }
}

/// Permission provider with a switchable grant.
#[derive(Debug, Clone, Default)]
pub struct MockPermissions {
    granted: Arc<Mutex<bool>>,
    requests: Arc<Mutex<usize>>,
}

impl MockPermissions {
    pub fn granted() -> Self {
        let permissions = Self::default();
        permissions.set_granted(true);
        permissions
    }

    pub fn denied() -> Self {
        Self::default()
    }

    pub fn set_granted(&self, granted: bool) {
        *self.granted.lock() = granted;
    }

    /// Number of times the user has been prompted.
    pub fn requests(&self) -> usize {
        *self.requests.lock()
    }
}

impl PermissionProvider for MockPermissions {
    fn has_permission(&self) -> bool {
        *self.granted.lock()
    }

    fn request_permission(&self) {
        *self.requests.lock() += 1;
    }
}

/// Result callback that records every reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyLog {
    replies: Arc<Mutex<Vec<Reply>>>,
}

impl ReplyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> CallbackHandle {
        Arc::new(self.clone())
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().clone()
    }

    /// Replies that close the channel.
    pub fn terminal_count(&self) -> usize {
        self.replies.lock().iter().filter(|r| !r.keeps_callback()).count()
    }

    pub fn data_count(&self) -> usize {
        self.replies
            .lock()
            .iter()
            .filter(|r| matches!(r, Reply::Event(e) if e.is_data()))
            .count()
    }

    pub fn last(&self) -> Option<Reply> {
        self.replies.lock().last().cloned()
    }
}

impl ResultCallback for ReplyLog {
    fn send(&self, reply: Reply) {
        self.replies.lock().push(reply);
    }
}
