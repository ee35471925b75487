//! Unified error types for studio-separator
//!
//! Error strategy:
//! - Separation-class errors (model load, engine failure, empty output,
//!   missing stem): absorbed by stage fallbacks where one exists
//! - Per-file errors (decode, format, stage failure): track fails, batch continues
//! - Configuration errors: fatal, abort before any track is touched
//!
//! All errors include actionable suggestions where possible.

use std::path::PathBuf;
use thiserror::Error;

/// Supported input formats for helpful error messages
pub const SUPPORTED_FORMATS: &str = "MP3, WAV, FLAC, M4A, AIFF";

/// Boxed underlying cause carried by engine failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for studio-separator operations
#[derive(Debug, Error)]
pub enum StudioError {
    // =========================================================================
    // Separation errors - recovered locally by de-reverb / karaoke fallbacks
    // =========================================================================
    #[error("Failed to load model '{model_id}': {reason}\n  Tip: Check the model filename and that MODEL_DIR points at your model cache")]
    ModelLoad { model_id: String, reason: String },

    #[error("Separation with model '{model_id}' failed: {source}")]
    Separation {
        model_id: String,
        #[source]
        source: BoxError,
    },

    #[error("Model '{model_id}' produced no output files")]
    EmptyOutput { model_id: String },

    #[error("No output containing '{keyword}' found in '{dir}'")]
    StemNotFound { keyword: String, dir: PathBuf },

    #[error("Stem identification needs at least one candidate file")]
    EmptyCandidateList,

    #[error("Separation engine unavailable: {reason}\n  Tip: Install it with `pip install audio-separator[gpu]` (or [cpu]) and make sure it is on PATH")]
    EngineUnavailable { reason: String },

    // =========================================================================
    // Per-file errors - fail the track, continue the batch
    // =========================================================================
    #[error("Failed to decode audio file '{path}': {reason}\n  Supported formats: {SUPPORTED_FORMATS}")]
    DecodeError { path: PathBuf, reason: String },

    #[error("Unsupported audio format for '{path}': {format}\n  Supported formats: {SUPPORTED_FORMATS}")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("File not found: '{0}'\n  Tip: Check the path exists and is accessible")]
    FileNotFound(PathBuf),

    #[error("Cannot mix sources: {0}")]
    MixError(String),

    #[error("Cannot write output to '{path}': {reason}\n  Tip: Check write permissions for the output directory")]
    OutputError { path: PathBuf, reason: String },

    // =========================================================================
    // Fatal errors - abort before processing
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for studio-separator operations
pub type Result<T> = std::result::Result<T, StudioError>;

impl StudioError {
    /// Returns true for failures a stage fallback may absorb
    pub fn is_separation_error(&self) -> bool {
        matches!(
            self,
            StudioError::ModelLoad { .. }
                | StudioError::Separation { .. }
                | StudioError::EmptyOutput { .. }
                | StudioError::StemNotFound { .. }
        )
    }

    /// Returns true if this error only concerns the current file
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StudioError::ConfigError(_))
    }

    /// Wrap an engine failure, keeping the underlying cause
    pub fn separation(model_id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StudioError::Separation {
            model_id: model_id.into(),
            source: source.into(),
        }
    }

    /// Create a decode error with context about the issue
    pub fn decode_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StudioError::DecodeError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an output error, checking for common issues
    pub fn output_error(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        let reason = match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                format!("Permission denied. Check that you have write access to {}", path.display())
            }
            std::io::ErrorKind::NotFound => {
                format!(
                    "Directory does not exist: {}",
                    path.parent().map(|p| p.display().to_string()).unwrap_or_default()
                )
            }
            _ => err.to_string(),
        };
        StudioError::OutputError { path, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separation_class() {
        assert!(StudioError::EmptyOutput { model_id: "m.onnx".into() }.is_separation_error());
        assert!(StudioError::separation("m.ckpt", "boom").is_separation_error());
        assert!(!StudioError::EmptyCandidateList.is_separation_error());
        assert!(!StudioError::ConfigError("x".into()).is_separation_error());
    }

    #[test]
    fn test_separation_keeps_source() {
        use std::error::Error;
        let err = StudioError::separation("UVR-MDX-NET-Voc_FT.onnx", "CUDA out of memory");
        assert!(err.to_string().contains("UVR-MDX-NET-Voc_FT.onnx"));
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn test_config_error_is_fatal() {
        assert!(!StudioError::ConfigError("bad".into()).is_recoverable());
        assert!(StudioError::FileNotFound("a.wav".into()).is_recoverable());
    }
}
