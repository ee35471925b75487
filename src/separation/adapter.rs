//! Scoped model invocation
//!
//! [`SeparationAdapter::separate`] is the only way the pipeline runs a model.
//! Each call builds its own engine, loads one model, separates one file and
//! releases the engine on every exit path, success or failure.

use super::engine::{EngineFactory, EngineSpec, SeparationEngine};
use super::params::{EngineParams, InferenceParams, ModelFamily, ParamOverrides};
use crate::error::{Result, StudioError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs separation models one call at a time
pub struct SeparationAdapter {
    factory: Arc<dyn EngineFactory>,
    model_dir: PathBuf,
    output_format: String,
    inference: InferenceParams,
}

impl SeparationAdapter {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        model_dir: impl Into<PathBuf>,
        output_format: impl Into<String>,
        inference: InferenceParams,
    ) -> Self {
        Self {
            factory,
            model_dir: model_dir.into(),
            output_format: output_format.into(),
            inference,
        }
    }

    /// File extension the engine writes stems with
    pub fn output_extension(&self) -> &str {
        &self.output_format
    }

    /// Parameters a call would run with; the configured base is left untouched
    pub fn resolve_params(
        &self,
        model_id: &str,
        family: ModelFamily,
        overrides: Option<&ParamOverrides>,
    ) -> EngineParams {
        let base = self.inference.base_for(model_id, family);
        match overrides {
            Some(patch) => base.merged(patch),
            None => base,
        }
    }

    /// Separate `input_path` with `model_id`, writing stems into `output_dir`
    ///
    /// Returns the written files in a stable (sorted) order. Fails with
    /// [`StudioError::ModelLoad`] when the model cannot be loaded,
    /// [`StudioError::Separation`] when inference fails and
    /// [`StudioError::EmptyOutput`] when the engine wrote nothing.
    pub fn separate(
        &self,
        input_path: &Path,
        output_dir: &Path,
        model_id: &str,
        overrides: Option<&ParamOverrides>,
    ) -> Result<Vec<PathBuf>> {
        let family = ModelFamily::from_model_id(model_id).ok_or_else(|| StudioError::ModelLoad {
            model_id: model_id.to_string(),
            reason: "cannot infer model family from file extension (expected .onnx, .ckpt, .pth or .yaml)"
                .to_string(),
        })?;

        fs::create_dir_all(output_dir).map_err(|e| StudioError::output_error(output_dir, e))?;

        let spec = EngineSpec {
            model_dir: self.model_dir.clone(),
            output_dir: output_dir.to_path_buf(),
            output_format: self.output_format.clone(),
            family,
            params: self.resolve_params(model_id, family, overrides),
        };
        debug!("Engine spec for {}: {:?}", model_id, spec);

        let engine = self
            .factory
            .create(spec)
            .map_err(|e| as_load_error(model_id, e))?;
        let mut engine = EngineGuard::new(engine, model_id);

        info!(
            "Separating {} with {} ({})",
            input_path.display(),
            model_id,
            family.name()
        );

        engine.load(model_id).map_err(|e| as_load_error(model_id, e))?;

        let mut outputs = engine
            .separate(input_path)
            .map_err(|e| as_separation_error(model_id, e))?;
        drop(engine);

        if outputs.is_empty() {
            return Err(StudioError::EmptyOutput {
                model_id: model_id.to_string(),
            });
        }

        outputs.sort();
        Ok(outputs)
    }
}

/// Releases the wrapped engine when dropped
struct EngineGuard<'a> {
    engine: Box<dyn SeparationEngine>,
    model_id: &'a str,
}

impl<'a> EngineGuard<'a> {
    fn new(engine: Box<dyn SeparationEngine>, model_id: &'a str) -> Self {
        Self { engine, model_id }
    }
}

impl std::ops::Deref for EngineGuard<'_> {
    type Target = dyn SeparationEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl std::ops::DerefMut for EngineGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine.as_mut()
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        self.engine.release();
        debug!("Released engine for {}", self.model_id);
    }
}

fn as_load_error(model_id: &str, err: StudioError) -> StudioError {
    match err {
        StudioError::ModelLoad { .. } | StudioError::EngineUnavailable { .. } => err,
        other => StudioError::ModelLoad {
            model_id: model_id.to_string(),
            reason: other.to_string(),
        },
    }
}

fn as_separation_error(model_id: &str, err: StudioError) -> StudioError {
    match err {
        StudioError::Separation { .. } | StudioError::EmptyOutput { .. } => err,
        other => StudioError::separation(model_id, other),
    }
}

// =============================================================================
// Output lookup
// =============================================================================

/// First path whose file name contains `keyword` (case-sensitive)
pub fn find_by_keyword(paths: &[PathBuf], keyword: &str, dir: &Path) -> Result<PathBuf> {
    paths
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(keyword))
        })
        .cloned()
        .ok_or_else(|| {
            warn!("No '{}' stem among {} outputs in {}", keyword, paths.len(), dir.display());
            StudioError::StemNotFound {
                keyword: keyword.to_string(),
                dir: dir.to_path_buf(),
            }
        })
}

/// Files in `dir` with extension `ext`, sorted by name
///
/// A missing directory yields an empty list.
pub fn cached_outputs(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    found.sort();
    found
}

/// Cached output in `dir` whose name contains `keyword`, if any
pub fn cached_stem(dir: &Path, ext: &str, keyword: &str) -> Option<PathBuf> {
    find_by_keyword(&cached_outputs(dir, ext), keyword, dir).ok()
}
