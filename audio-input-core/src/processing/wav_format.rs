/// WAV file format utilities.
///
/// Generates standard 44-byte RIFF WAV headers for integer PCM.
use crate::models::config::CaptureConfig;
use crate::models::error::CaptureError;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Largest payload whose RIFF chunk size (`36 + data_size`) still fits in u32.
pub const MAX_DATA_SIZE: u64 = u32::MAX as u64 - 36;

const FMT_CHUNK_SIZE: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// Format parameters written into the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// Bytes per second. Fails if the value does not fit the header field.
    pub fn byte_rate(&self) -> Result<u32, CaptureError> {
        let rate = self.sample_rate as u64 * self.channels as u64 * self.bits_per_sample as u64 / 8;
        u32::try_from(rate).map_err(|_| {
            CaptureError::InvalidConfiguration(format!("byte rate {} does not fit a WAV header", rate))
        })
    }

    /// Bytes per sample frame. Fails if the value does not fit the header field.
    pub fn block_align(&self) -> Result<u16, CaptureError> {
        let align = self.channels as u32 * self.bits_per_sample as u32 / 8;
        u16::try_from(align).map_err(|_| {
            CaptureError::InvalidConfiguration(format!("block align {} does not fit a WAV header", align))
        })
    }
}

impl From<&CaptureConfig> for WavSpec {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate_hz,
            channels: config.channel_count,
            bits_per_sample: config.sample_format.bits_per_sample(),
        }
    }
}

/// Generate a 44-byte WAV RIFF header.
///
/// Format: PCM (format code 1), little-endian.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bits_per_sample / 8
/// [32-33]  block_align = channels * bits_per_sample / 8
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(spec: &WavSpec, data_size: u64) -> Result<[u8; WAV_HEADER_SIZE], CaptureError> {
    if data_size > MAX_DATA_SIZE {
        return Err(CaptureError::Storage(format!(
            "pcm payload of {} bytes exceeds the WAV size limit",
            data_size
        )));
    }
    let byte_rate = spec.byte_rate()?;
    let block_align = spec.block_align()?;
    let data_size = data_size as u32;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    header[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&spec.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    Ok(header)
}
