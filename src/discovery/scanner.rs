//! File discovery and scanning

use crate::error::{Result, StudioError};
use crate::types::AudioFormat;
use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Discovered audio file with basic metadata
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub size_bytes: u64,
}

impl DiscoveredFile {
    /// File name without directory, for log lines and `process_info.json`
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Scan a path (file or directory) for audio files
///
/// Directories are walked recursively in file-name order. With `target`
/// set, only files whose name matches the glob (`*`, `?`, `[...]`) are kept.
pub fn scan(input: &Path, target: Option<&str>) -> Result<Vec<DiscoveredFile>> {
    if !input.exists() {
        return Err(StudioError::FileNotFound(input.to_path_buf()));
    }

    let matcher = target.map(compile_target).transpose()?;
    let mut files = Vec::new();

    if input.is_file() {
        // Single file mode
        if let Some(file) = try_discover_file(input) {
            files.push(file);
        } else {
            return Err(StudioError::UnsupportedFormat {
                path: input.to_path_buf(),
                format: input
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
    } else if input.is_dir() {
        let walker = WalkDir::new(input).sort_by_file_name();

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(ref matcher) = matcher {
                if !matcher.is_match(entry.file_name()) {
                    continue;
                }
            }
            match try_discover_file(path) {
                Some(file) => {
                    debug!("Discovered: {}", file.path.display());
                    files.push(file);
                }
                None if target.is_some() => {
                    warn!("Skipping {}: unsupported format", path.display());
                }
                None => {}
            }
        }
    }

    info!("Discovered {} audio files", files.len());

    if files.is_empty() {
        match target {
            Some(pattern) => warn!("No files matching '{}' found in {}", pattern, input.display()),
            None => warn!("No supported audio files found in {}", input.display()),
        }
    }

    Ok(files)
}

/// Try to create a DiscoveredFile if the path is a supported audio format
fn try_discover_file(path: &Path) -> Option<DiscoveredFile> {
    let ext = path.extension()?.to_str()?;
    let format = AudioFormat::from_extension(ext)?;

    let metadata = std::fs::metadata(path).ok()?;
    let size_bytes = metadata.len();

    Some(DiscoveredFile {
        path: path.to_path_buf(),
        format,
        size_bytes,
    })
}

/// Compile the target filename filter once per scan
fn compile_target(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| StudioError::ConfigError(format!("Invalid target pattern '{}': {}", pattern, e)))
}
