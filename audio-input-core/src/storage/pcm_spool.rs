use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::models::error::CaptureError;

/// Temporary file that collects raw PCM while a file session records.
///
/// The payload size is only known once capture ends, so samples are spooled
/// here and copied behind a correct WAV header afterwards. The file is
/// removed when the spool is dropped.
pub struct PcmSpool {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl PcmSpool {
    /// Create a fresh, uniquely named spool file in `directory`.
    pub fn create(directory: &Path) -> Result<Self, CaptureError> {
        let path = directory.join(format!("audio-input-{}.pcm", uuid::Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| CaptureError::storage(&format!("failed to create spool {}", path.display()), e))?;

        log::debug!("spooling pcm to {}", path.display());
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CaptureError::Storage("spool is closed".into()))?;
        writer
            .write_all(data)
            .map_err(|e| CaptureError::storage("spool write failed", e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush and close the file. Further appends fail.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| CaptureError::storage("spool flush failed", e))?;
        }
        Ok(())
    }

    /// Bytes accepted by `append` so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PcmSpool {
    fn drop(&mut self) {
        self.writer = None;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove spool {}: {}", self.path.display(), e);
            }
        }
    }
}
