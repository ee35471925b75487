//! Per-track run report (`process_info.json`)

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Report file name inside each track's output directory
pub const PROCESS_INFO_FILE: &str = "process_info.json";

/// Timestamp layout for `processed_at` (local time)
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Top-level report structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub processed_at: String,
    pub file: FileInfo,
    pub stats: RunStats,
    /// Settings the track was processed with
    pub config_snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Seconds, 2 decimal places
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Wall-clock seconds, 2 decimal places
    pub elapsed: f64,
    /// Real-time factor (elapsed / duration), 3 decimal places
    pub rtf: f64,
}

impl ProcessInfo {
    pub fn new(
        file_name: &str,
        duration_secs: f64,
        elapsed_secs: f64,
        config_snapshot: serde_json::Value,
    ) -> Self {
        let rtf = if duration_secs > 0.0 {
            elapsed_secs / duration_secs
        } else {
            0.0
        };

        Self {
            processed_at: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            file: FileInfo {
                name: file_name.to_string(),
                duration: round_to(duration_secs, 2),
            },
            stats: RunStats {
                elapsed: round_to(elapsed_secs, 2),
                rtf: round_to(rtf, 3),
            },
            config_snapshot,
        }
    }
}

/// Write `process_info.json` into `song_dir`
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
pub fn write_process_info(song_dir: &Path, info: &ProcessInfo) -> Result<PathBuf> {
    let output_path = song_dir.join(PROCESS_INFO_FILE);
    let temp_path = output_path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| StudioError::OutputError {
        path: output_path.clone(),
        reason: format!("Failed to create temp file: {}", e),
    })?;

    serde_json::to_writer_pretty(BufWriter::new(file), info).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StudioError::OutputError {
            path: output_path.clone(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, &output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        StudioError::OutputError {
            path: output_path.clone(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    debug!("Wrote {}", output_path.display());
    Ok(output_path)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
