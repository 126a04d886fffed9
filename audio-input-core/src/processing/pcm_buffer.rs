//! Fixed-size sample buffer filled by one blocking device read.

use std::borrow::Cow;
use std::fmt::Write;

use crate::models::config::SampleFormat;
use crate::models::error::CaptureError;

/// A read buffer of `len` samples, typed by sample width.
///
/// 8-bit PCM is unsigned (WAV convention), 16-bit PCM is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmBuffer {
    Pcm8(Vec<u8>),
    Pcm16(Vec<i16>),
}

impl PcmBuffer {
    /// Allocate a zeroed buffer holding `len` samples.
    pub fn new(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Pcm8 => Self::Pcm8(vec![0; len]),
            SampleFormat::Pcm16 => Self::Pcm16(vec![0; len]),
        }
    }

    /// Capacity in samples.
    pub fn len(&self) -> usize {
        match self {
            Self::Pcm8(samples) => samples.len(),
            Self::Pcm16(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes of the first `count` samples, as they are laid
    /// out in a WAV `data` chunk.
    pub fn le_bytes(&self, count: usize) -> Cow<'_, [u8]> {
        match self {
            Self::Pcm8(samples) => Cow::Borrowed(&samples[..count.min(samples.len())]),
            Self::Pcm16(samples) => Cow::Owned(
                samples[..count.min(samples.len())]
                    .iter()
                    .flat_map(|s| s.to_le_bytes())
                    .collect(),
            ),
        }
    }

    /// Text form of the first `count` samples: `[s0, s1, ...]`.
    pub fn encode(&self, count: usize) -> Result<String, CaptureError> {
        if count > self.len() {
            return Err(CaptureError::Encoding(format!(
                "read reported {} samples but buffer holds {}",
                count,
                self.len()
            )));
        }
        match self {
            Self::Pcm8(samples) => Ok(join_samples(&samples[..count])),
            Self::Pcm16(samples) => Ok(join_samples(&samples[..count])),
        }
    }
}

fn join_samples<T: std::fmt::Display>(samples: &[T]) -> String {
    let mut out = String::with_capacity(2 + samples.len() * 7);
    out.push('[');
    for (i, sample) in samples.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        // Writing into a String cannot fail.
        let _ = write!(out, "{}", sample);
    }
    out.push(']');
    out
}
