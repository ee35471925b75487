//! Stage completion checks
//!
//! In [`CheckpointMode::Presence`] a stage is complete when all of its
//! output files exist; nothing else is recorded. [`CheckpointMode::Fingerprint`]
//! additionally requires a `<output>.fingerprint` sidecar whose SHA-256
//! (over the stage id, its parameters and the bytes of its inputs) still
//! matches.

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar extension appended to a stage output
const SIDECAR_EXT: &str = "fingerprint";

/// How cached stage outputs are trusted
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointMode {
    /// Output files exist
    #[default]
    Presence,
    /// Output files exist and their recorded fingerprint matches
    Fingerprint,
}

/// One pipeline step and the files it reads and writes
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: &'static str,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Canonical rendering of whatever parameters shape the outputs
    pub params: String,
}

impl Stage {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: String::new(),
        }
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn outputs(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.outputs.extend(paths);
        self
    }

    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }
}

/// Completion checks under one [`CheckpointMode`]
#[derive(Debug, Clone, Copy)]
pub struct Checkpoints {
    mode: CheckpointMode,
}

impl Checkpoints {
    pub fn new(mode: CheckpointMode) -> Self {
        Self { mode }
    }

    /// Check if every output of `stage` can be reused
    pub fn is_complete(&self, stage: &Stage) -> bool {
        if stage.outputs.is_empty() || !stage.outputs.iter().all(|p| p.is_file()) {
            return false;
        }

        match self.mode {
            CheckpointMode::Presence => true,
            CheckpointMode::Fingerprint => {
                let expected = match fingerprint(stage) {
                    Ok(digest) => digest,
                    Err(e) => {
                        debug!("Cannot fingerprint stage {}: {}", stage.id, e);
                        return false;
                    }
                };
                stage.outputs.iter().all(|output| {
                    let matches = std::fs::read_to_string(sidecar_path(output))
                        .map(|recorded| recorded.trim() == expected)
                        .unwrap_or(false);
                    if !matches {
                        debug!("Fingerprint mismatch for {}", output.display());
                    }
                    matches
                })
            }
        }
    }

    /// Mark `stage` complete; call only after all outputs are written
    pub fn record(&self, stage: &Stage) -> Result<()> {
        if self.mode == CheckpointMode::Presence {
            return Ok(());
        }

        let digest = fingerprint(stage)?;
        for output in &stage.outputs {
            let sidecar = sidecar_path(output);
            std::fs::write(&sidecar, &digest).map_err(|e| StudioError::output_error(&sidecar, e))?;
        }
        Ok(())
    }
}

/// SHA-256 over stage id, parameters and input bytes, hex encoded
pub fn fingerprint(stage: &Stage) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(stage.id.as_bytes());
    hasher.update([0u8]);
    hasher.update(stage.params.as_bytes());
    for input in &stage.inputs {
        hasher.update([0u8]);
        let mut file = File::open(input).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StudioError::FileNotFound(input.clone()),
            _ => StudioError::Io(e),
        })?;
        std::io::copy(&mut file, &mut hasher)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `<output>.fingerprint`
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXT);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage(dir: &Path) -> Stage {
        Stage::new("02_Dry_Vocals")
            .input(dir.join("in.wav"))
            .output(dir.join("out.wav"))
            .params("Reverb_HQ_By_FoxJoy.onnx")
    }

    #[test]
    fn test_presence_mode() {
        let temp = TempDir::new().unwrap();
        let checkpoints = Checkpoints::new(CheckpointMode::Presence);
        let stage = stage(temp.path());

        assert!(!checkpoints.is_complete(&stage));
        std::fs::write(temp.path().join("out.wav"), b"anything").unwrap();
        assert!(checkpoints.is_complete(&stage));

        checkpoints.record(&stage).unwrap();
        assert!(!sidecar_path(&temp.path().join("out.wav")).exists());
    }

    #[test]
    fn test_stage_without_outputs_never_complete() {
        let checkpoints = Checkpoints::new(CheckpointMode::Presence);
        assert!(!checkpoints.is_complete(&Stage::new("empty")));
    }

    #[test]
    fn test_fingerprint_mode() {
        let temp = TempDir::new().unwrap();
        let checkpoints = Checkpoints::new(CheckpointMode::Fingerprint);
        let stage = stage(temp.path());

        std::fs::write(temp.path().join("in.wav"), b"input-v1").unwrap();
        std::fs::write(temp.path().join("out.wav"), b"output").unwrap();
        assert!(!checkpoints.is_complete(&stage), "no sidecar yet");

        checkpoints.record(&stage).unwrap();
        assert!(checkpoints.is_complete(&stage));

        std::fs::write(temp.path().join("in.wav"), b"input-v2").unwrap();
        assert!(!checkpoints.is_complete(&stage), "input changed");

        checkpoints.record(&stage).unwrap();
        let retuned = stage.clone().params("Reverb_HQ_By_FoxJoy.onnx segment=512");
        assert!(!checkpoints.is_complete(&retuned), "params changed");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("in.wav"), b"same").unwrap();
        let a = fingerprint(&stage(temp.path())).unwrap();
        let b = fingerprint(&stage(temp.path())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/o/03_vocals_final.wav")),
            PathBuf::from("/o/03_vocals_final.wav.fingerprint")
        );
    }
}
