//! WAV encoding using hound
//!
//! Uses atomic write pattern: writes to a temp file first, then renames.
//! A stage that fails halfway never leaves a file a later run would
//! mistake for a finished checkpoint.

use crate::error::{Result, StudioError};
use crate::types::Track;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write a track as 16-bit PCM WAV
pub fn write_wav(path: &Path, track: &Track) -> Result<()> {
    let temp_path = partial_path(path);

    if let Err(e) = encode(&temp_path, track) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StudioError::OutputError {
            path: path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    debug!("Wrote {} frames to {}", track.len(), path.display());
    Ok(())
}

/// Copy a finished file into place without exposing a partial destination
pub fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let temp_path = partial_path(dst);
    std::fs::copy(src, &temp_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StudioError::output_error(dst, e)
    })?;
    std::fs::rename(&temp_path, dst).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StudioError::output_error(dst, e)
    })?;
    debug!("Copied {} -> {}", src.display(), dst.display());
    Ok(())
}

/// Hidden sibling used while a file is being produced
///
/// The name does not end in `.wav`, so cache scans never pick it up.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.partial", name))
}

fn encode(path: &Path, track: &Track) -> Result<()> {
    let channels = u16::try_from(track.channel_count().max(1)).map_err(|_| {
        StudioError::OutputError {
            path: path.to_path_buf(),
            reason: format!("Too many channels ({})", track.channel_count()),
        }
    })?;

    let spec = hound::WavSpec {
        channels,
        sample_rate: track.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let to_output_error = |e: hound::Error| StudioError::OutputError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_output_error)?;

    if track.channel_count() == 0 {
        writer.finalize().map_err(to_output_error)?;
        return Ok(());
    }

    for i in 0..track.len() {
        for ch in &track.channels {
            let sample = (ch[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample).map_err(to_output_error)?;
        }
    }

    writer.finalize().map_err(to_output_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_leaves_no_partial() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("out.wav");
        write_wav(&path, &Track::mono(vec![0.1; 100], 44100)).expect("write");

        assert!(path.exists());
        assert!(!partial_path(&path).exists());
        let reader = hound::WavReader::open(&path).expect("open");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 100);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("missing_dir").join("out.wav");
        assert!(write_wav(&path, &Track::mono(vec![0.1; 10], 44100)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_name_is_not_wav() {
        let p = partial_path(Path::new("/a/02_Dry_Vocals.wav"));
        assert_eq!(p, PathBuf::from("/a/.02_Dry_Vocals.wav.partial"));
        assert_ne!(p.extension().and_then(|e| e.to_str()), Some("wav"));
    }

    #[test]
    fn test_copy_atomic() {
        let dir = TempDir::new().expect("temp dir");
        let src = dir.path().join("src.wav");
        let dst = dir.path().join("dst.wav");
        std::fs::write(&src, b"payload").expect("write");
        copy_atomic(&src, &dst).expect("copy");
        assert_eq!(std::fs::read(&dst).expect("read"), b"payload");
    }
}
