//! Engine seam between the pipeline and whatever runs model inference
//!
//! An engine holds exactly one model on the accelerator at a time. The
//! adapter asks an [`EngineFactory`] for a fresh engine per call and
//! releases it before returning, so nothing stays resident between stages.

use super::params::{EngineParams, ModelFamily};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Everything an engine needs to be constructed for one call
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSpec {
    /// Directory where model weights are cached
    pub model_dir: PathBuf,
    /// Directory the engine writes stems into
    pub output_dir: PathBuf,
    /// Container for written stems, e.g. "wav"
    pub output_format: String,
    pub family: ModelFamily,
    pub params: EngineParams,
}

/// A loaded-model separation engine
pub trait SeparationEngine {
    /// Load `model_id` (a model file name) onto the accelerator
    fn load(&mut self, model_id: &str) -> Result<()>;

    /// Separate `input_path` and return the files written
    fn separate(&mut self, input_path: &Path) -> Result<Vec<PathBuf>>;

    /// Drop the model and free accelerator memory; must be idempotent
    fn release(&mut self);
}

/// Builds engines on demand
///
/// Implementations must be `Send + Sync` so the batch driver can share one
/// factory across the whole run.
pub trait EngineFactory: Send + Sync {
    /// Construct an engine configured by `spec`
    fn create(&self, spec: EngineSpec) -> Result<Box<dyn SeparationEngine>>;

    /// Check if the backing runtime is installed
    fn is_available(&self) -> bool;

    /// Get the factory's name for logging
    fn name(&self) -> &'static str;
}
