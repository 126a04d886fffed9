use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Device buffer margin over the caller's read chunk, to avoid underruns.
pub const RECORDING_BUFFER_FACTOR: usize = 5;

pub const DEFAULT_SAMPLE_RATE: i32 = 44100;
pub const DEFAULT_BUFFER_SIZE: i32 = 4096;
pub const DEFAULT_CHANNELS: i32 = 1;
/// Highest accepted sample rate.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Size of the device's internal capture buffer for a given read chunk.
///
/// Both arguments and the result are in bytes.
pub fn recording_buffer_size(read_buffer_bytes: usize, min_buffer_bytes: usize) -> usize {
    (read_buffer_bytes * RECORDING_BUFFER_FACTOR).max(min_buffer_bytes)
}

/// Linear PCM sample width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    #[serde(rename = "PCM_8BIT")]
    Pcm8,
    #[serde(rename = "PCM_16BIT")]
    Pcm16,
}

impl SampleFormat {
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::Pcm8 => 8,
            Self::Pcm16 => 16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits_per_sample() as usize / 8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pcm8 => "PCM_8BIT",
            Self::Pcm16 => "PCM_16BIT",
        }
    }
}

impl FromStr for SampleFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PCM_8BIT" => Ok(Self::Pcm8),
            "PCM_16BIT" => Ok(Self::Pcm16),
            other => Err(CaptureError::InvalidConfiguration(format!(
                "unsupported sample format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input source selector handed to the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSourceType {
    Default,
    Mic,
    Camcorder,
    VoiceRecognition,
    VoiceCommunication,
    Unprocessed,
    /// A driver-specific selector without a named constant.
    Other(i32),
}

impl AudioSourceType {
    pub fn code(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Mic => 1,
            Self::Camcorder => 5,
            Self::VoiceRecognition => 6,
            Self::VoiceCommunication => 7,
            Self::Unprocessed => 9,
            Self::Other(code) => code,
        }
    }
}

impl From<i32> for AudioSourceType {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Default,
            1 => Self::Mic,
            5 => Self::Camcorder,
            6 => Self::VoiceRecognition,
            7 => Self::VoiceCommunication,
            9 => Self::Unprocessed,
            other => Self::Other(other),
        }
    }
}

/// Where captured audio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSink {
    /// Each chunk is encoded and delivered as a `data` event.
    Stream,
    /// Raw PCM is spooled and finalized into a WAV file at this path.
    File(PathBuf),
}

impl CaptureSink {
    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Stream => SinkKind::Stream,
            Self::File(_) => SinkKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Stream,
    File,
}

/// Untrusted `start` arguments as they arrive from the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureRequest {
    pub sample_rate: i32,
    /// Read chunk size, in sample elements.
    pub buffer_size: i32,
    pub channels: i32,
    pub format: String,
    pub audio_source_type: i32,
    pub file_url: Option<String>,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            channels: DEFAULT_CHANNELS,
            format: SampleFormat::Pcm16.as_str().to_string(),
            audio_source_type: 0,
            file_url: None,
        }
    }
}

/// Validated, immutable configuration of one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate_hz: u32,
    /// Read chunk size in sample elements (not bytes).
    pub buffer_size: u32,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    pub audio_source: AudioSourceType,
    pub sink: CaptureSink,
}

impl CaptureConfig {
    /// Bytes covered by one read chunk.
    pub fn read_buffer_bytes(&self) -> usize {
        self.buffer_size as usize * self.sample_format.bytes_per_sample()
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.sink.kind()
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate_hz == 0 {
            return Err(CaptureError::InvalidConfiguration("sample rate must be positive".into()));
        }
        if self.sample_rate_hz > MAX_SAMPLE_RATE {
            return Err(CaptureError::InvalidConfiguration(format!(
                "sample rate {} Hz exceeds {} Hz",
                self.sample_rate_hz, MAX_SAMPLE_RATE
            )));
        }
        if self.buffer_size == 0 {
            return Err(CaptureError::InvalidConfiguration("buffer size must be positive".into()));
        }
        if ![1, 2].contains(&self.channel_count) {
            return Err(CaptureError::InvalidConfiguration(format!(
                "unsupported channel count: {}",
                self.channel_count
            )));
        }
        if let CaptureSink::File(path) = &self.sink {
            if !path.is_absolute() {
                return Err(CaptureError::InvalidUrl(format!(
                    "path is not absolute: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE as u32,
            buffer_size: DEFAULT_BUFFER_SIZE as u32,
            channel_count: DEFAULT_CHANNELS as u16,
            sample_format: SampleFormat::Pcm16,
            audio_source: AudioSourceType::Default,
            sink: CaptureSink::Stream,
        }
    }
}

impl TryFrom<CaptureRequest> for CaptureConfig {
    type Error = CaptureError;

    fn try_from(request: CaptureRequest) -> Result<Self, Self::Error> {
        // The destination is checked first so that a bad URL is always
        // reported as such, whatever else is wrong with the request.
        let sink = match request.file_url.as_deref() {
            None => CaptureSink::Stream,
            Some(url) => CaptureSink::File(parse_file_url(url)?),
        };

        let positive = |value: i32, what: &str| {
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| CaptureError::InvalidConfiguration(format!("{} must be positive, got {}", what, value)))
        };

        let channel_count = u16::try_from(request.channels)
            .map_err(|_| CaptureError::InvalidConfiguration(format!("unsupported channel count: {}", request.channels)))?;

        let config = Self {
            sample_rate_hz: positive(request.sample_rate, "sample rate")?,
            buffer_size: positive(request.buffer_size, "buffer size")?,
            channel_count,
            sample_format: request.format.parse()?,
            audio_source: AudioSourceType::from(request.audio_source_type),
            sink,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Resolve a `file:` URL to a local absolute path.
///
/// Accepts `file:/p`, `file:///p` and `file://localhost/p`. Percent-escapes in
/// the path are decoded. Remote authorities, other schemes, relative paths,
/// queries and fragments are rejected.
pub fn parse_file_url(url: &str) -> Result<PathBuf, CaptureError> {
    let invalid = |reason: &str| CaptureError::InvalidUrl(format!("{}: {}", reason, url));

    if url.is_empty() || url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("malformed url"));
    }

    let (scheme, rest) = url.split_once(':').ok_or_else(|| invalid("missing scheme"))?;
    let scheme_ok = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !scheme_ok {
        return Err(invalid("malformed scheme"));
    }
    if !scheme.eq_ignore_ascii_case("file") {
        return Err(invalid("not a file url"));
    }
    if rest.contains(['?', '#']) {
        return Err(invalid("query or fragment not allowed"));
    }

    let path = match rest.strip_prefix("//") {
        Some(after) => {
            let (authority, path) = after.split_at(after.find('/').unwrap_or(after.len()));
            if !authority.is_empty() && !authority.eq_ignore_ascii_case("localhost") {
                return Err(invalid("remote authority not allowed"));
            }
            path
        }
        None => rest,
    };

    if !path.starts_with('/') {
        return Err(invalid("path is not absolute"));
    }
    let decoded = urlencoding::decode(path).map_err(|_| invalid("path is not valid utf-8"))?;
    if decoded.ends_with('/') {
        return Err(invalid("url names a directory"));
    }
    Ok(PathBuf::from(decoded.into_owned()))
}

/// Inverse of [`parse_file_url`]: `file://` plus the percent-encoded path.
pub fn file_url(path: &Path) -> String {
    let lossy = path.to_string_lossy();
    let segments: Vec<_> = lossy.split('/').map(urlencoding::encode).collect();
    format!("file://{}", segments.join("/"))
}

/// Session-wide settings that are not part of a single recording.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Directory where raw PCM is spooled before WAV finalization.
    pub spool_directory: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            spool_directory: std::env::temp_dir(),
        }
    }
}
