use crate::models::config::{recording_buffer_size, AudioSourceType, CaptureConfig, SampleFormat};
use crate::models::error::{CaptureError, ReadError};
use crate::processing::pcm_buffer::PcmBuffer;

/// Parameters used to open an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub source: AudioSourceType,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Internal device buffer size in bytes.
    pub buffer_size_bytes: usize,
}

impl DeviceParams {
    /// Derive open parameters for `config`, sizing the internal buffer from
    /// the read chunk and the device minimum.
    pub fn for_config(config: &CaptureConfig, min_buffer_bytes: usize) -> Self {
        Self {
            source: config.audio_source,
            sample_rate: config.sample_rate_hz,
            channels: config.channel_count,
            format: config.sample_format,
            buffer_size_bytes: recording_buffer_size(config.read_buffer_bytes(), min_buffer_bytes),
        }
    }
}

/// Factory for input device handles (the platform audio driver).
pub trait AudioBackend: Send + Sync + 'static {
    /// Smallest internal buffer, in bytes, the device accepts for this format.
    fn min_buffer_size(&self, sample_rate: u32, channels: u16, format: SampleFormat) -> Result<usize, CaptureError>;

    /// Open a device handle. The handle is owned by exactly one capture worker.
    fn open(&self, params: &DeviceParams) -> Result<Box<dyn AudioDevice>, CaptureError>;
}

/// An open input device with a blocking read.
///
/// Used from the capture worker's thread only.
pub trait AudioDevice: Send {
    fn start_recording(&mut self) -> Result<(), CaptureError>;

    /// Block until samples are available and fill the front of `buffer`.
    ///
    /// Returns the number of samples written; zero means nothing was read
    /// this time and is not an error.
    fn read(&mut self, buffer: &mut PcmBuffer) -> Result<usize, ReadError>;

    fn is_recording(&self) -> bool;

    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Give the device back to the driver. Consumes the handle, so it happens
    /// at most once and the handle is never reused.
    fn release(self: Box<Self>);
}
