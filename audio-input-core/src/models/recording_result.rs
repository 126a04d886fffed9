use std::path::PathBuf;

use serde::Serialize;

use super::config::file_url;

/// Result carried by the terminal `file` event of a file session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    pub id: String,
    pub file_path: PathBuf,
    pub file_url: String,
    /// Length of the PCM payload, equal to the WAV `data` chunk size.
    pub data_bytes: u64,
    pub duration_secs: f64,
    /// SHA-256 of the finished WAV file, lowercase hex.
    pub checksum: String,
    pub created_at: String,
}

impl RecordingResult {
    pub fn new(file_path: PathBuf, data_bytes: u64, byte_rate: u32, checksum: String) -> Self {
        let duration_secs = if byte_rate == 0 {
            0.0
        } else {
            data_bytes as f64 / byte_rate as f64
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_url: file_url(&file_path),
            file_path,
            data_bytes,
            duration_secs,
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
