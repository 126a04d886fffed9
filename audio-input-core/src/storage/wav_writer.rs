use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::processing::wav_format::{self, WavSpec};

/// Payload is copied in chunks of this many bytes.
const COPY_CHUNK_SIZE: usize = 8192;

/// Write `dest` as a WAV file wrapping the raw PCM in `pcm`.
///
/// The `data` size is taken from the length of the PCM file, and the copy is
/// checked against it, so header and payload cannot disagree. Samples are
/// copied unmodified. Returns the payload size in bytes.
pub fn write_wav(pcm: &Path, dest: &Path, spec: &WavSpec) -> Result<u64, CaptureError> {
    let mut source = File::open(pcm)
        .map_err(|e| CaptureError::storage(&format!("failed to open pcm {}", pcm.display()), e))?;
    let data_size = source
        .metadata()
        .map_err(|e| CaptureError::storage("failed to stat pcm", e))?
        .len();
    let header = wav_format::generate_wav_header(spec, data_size)?;

    let file = File::create(dest)
        .map_err(|e| CaptureError::storage(&format!("failed to create {}", dest.display()), e))?;
    let mut out = BufWriter::new(file);
    out.write_all(&header)
        .map_err(|e| CaptureError::storage("failed to write wav header", e))?;

    let mut chunk = [0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = source
            .read(&mut chunk)
            .map_err(|e| CaptureError::storage("failed to read pcm", e))?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])
            .map_err(|e| CaptureError::storage("failed to write wav payload", e))?;
        copied += n as u64;
    }

    if copied != data_size {
        return Err(CaptureError::Storage(format!(
            "pcm source changed during copy: header says {} bytes, copied {}",
            data_size, copied
        )));
    }

    out.flush()
        .map_err(|e| CaptureError::storage("failed to flush wav", e))?;
    Ok(data_size)
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file =
        File::open(path).map_err(|e| CaptureError::storage("failed to read file for checksum", e))?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; COPY_CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut chunk)
            .map_err(|e| CaptureError::storage("failed to read file for checksum", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Remove a stale file at `path`, if any.
pub fn remove_existing(path: &Path) -> Result<bool, CaptureError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CaptureError::storage(&format!("failed to remove {}", path.display()), e)),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("audio_input_test_{}_{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn wraps_pcm_without_touching_samples() {
        let pcm_path = temp_file_path("take.pcm");
        let wav_path = temp_file_path("take.wav");
        let samples: Vec<i16> = (0..3000).map(|i| (i * 7 - 9000) as i16).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        fs::write(&pcm_path, &pcm).unwrap();

        let spec = WavSpec { sample_rate: 16000, channels: 1, bits_per_sample: 16 };
        let data_size = write_wav(&pcm_path, &wav_path, &spec).unwrap();
        assert_eq!(data_size, pcm.len() as u64);

        let bytes = fs::read(&wav_path).unwrap();
        assert_eq!(bytes.len(), 44 + pcm.len());
        assert_eq!(&bytes[44..], &pcm[..]);

        let mut reader = hound::WavReader::open(&wav_path).unwrap();
        let read_spec = reader.spec();
        assert_eq!(read_spec.sample_rate, 16000);
        assert_eq!(read_spec.channels, 1);
        assert_eq!(read_spec.bits_per_sample, 16);
        assert_eq!(read_spec.sample_format, hound::SampleFormat::Int);
        let decoded: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(decoded, samples);

        fs::remove_file(&pcm_path).ok();
        fs::remove_file(&wav_path).ok();
    }

    #[test]
    fn header_sizes_match_pcm_length() {
        for n in [0usize, 1, 4095, 8192, 8193] {
            let pcm_path = temp_file_path("len.pcm");
            let wav_path = temp_file_path("len.wav");
            fs::write(&pcm_path, vec![0x80u8; n]).unwrap();

            let spec = WavSpec { sample_rate: 8000, channels: 1, bits_per_sample: 8 };
            write_wav(&pcm_path, &wav_path, &spec).unwrap();

            let bytes = fs::read(&wav_path).unwrap();
            let riff = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            let data = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
            assert_eq!(data as usize, n);
            assert_eq!(riff as usize, 36 + n);

            fs::remove_file(&pcm_path).ok();
            fs::remove_file(&wav_path).ok();
        }
    }

    #[test]
    fn missing_pcm_is_a_storage_error() {
        let spec = WavSpec { sample_rate: 8000, channels: 1, bits_per_sample: 8 };
        let err = write_wav(&temp_file_path("absent.pcm"), &temp_file_path("absent.wav"), &spec).unwrap_err();
        assert!(matches!(err, CaptureError::Storage(_)));
    }

    #[test]
    fn checksum_is_hex_sha256() {
        let path = temp_file_path("abc.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn remove_existing_reports_whether_a_file_was_there() {
        let path = temp_file_path("stale.wav");
        fs::write(&path, b"old").unwrap();
        assert!(remove_existing(&path).unwrap());
        assert!(!remove_existing(&path).unwrap());
    }
}
