//! Separation engine parameters
//!
//! Each model family has a built-in base parameter set. Configuration and
//! individual calls patch it with [`ParamOverrides`], whose fields are all
//! optional. Merging never mutates the base: it always yields a new
//! [`EngineParams`].

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Architecture family of a separation model, inferred from its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// MDX-Net ONNX models
    Mdx,
    /// MDX23C and (Mel-)Band RoFormer checkpoints
    Mdxc,
    /// VR architecture (UVR) models
    Vr,
    /// Demucs bags of models
    Demucs,
}

impl ModelFamily {
    /// Detect the family from a model file name
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let ext = std::path::Path::new(model_id)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();
        match ext.as_str() {
            "onnx" => Some(ModelFamily::Mdx),
            "ckpt" => Some(ModelFamily::Mdxc),
            "pth" => Some(ModelFamily::Vr),
            "yaml" | "yml" => Some(ModelFamily::Demucs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::Mdx => "mdx",
            ModelFamily::Mdxc => "mdxc",
            ModelFamily::Vr => "vr",
            ModelFamily::Demucs => "demucs",
        }
    }
}

/// Fully resolved parameters handed to one engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub batch_size: u32,
    /// Segment size for MDX/MDXC/Demucs, window size for VR
    pub segment_size: u32,
    /// Fraction for MDX/Demucs, overlap factor for MDXC
    pub overlap: f32,
    /// VR aggressiveness
    pub aggression: i32,
    pub enable_denoise: bool,
    pub enable_tta: bool,
    pub enable_post_process: bool,
    pub post_process_threshold: f32,
    pub high_end_process: bool,
    /// Mixed-precision inference on the accelerator
    pub use_autocast: bool,
}

impl EngineParams {
    /// Built-in defaults for a family
    pub fn for_family(family: ModelFamily) -> Self {
        let common = Self {
            batch_size: 1,
            segment_size: 256,
            overlap: 0.25,
            aggression: 5,
            enable_denoise: false,
            enable_tta: false,
            enable_post_process: false,
            post_process_threshold: 0.2,
            high_end_process: false,
            use_autocast: false,
        };
        match family {
            ModelFamily::Mdx => common,
            ModelFamily::Mdxc => Self {
                overlap: 8.0,
                ..common
            },
            ModelFamily::Vr => Self {
                segment_size: 512,
                ..common
            },
            ModelFamily::Demucs => Self {
                segment_size: 40,
                ..common
            },
        }
    }

    /// Copy with every field present in `overrides` replaced
    pub fn merged(&self, overrides: &ParamOverrides) -> EngineParams {
        EngineParams {
            batch_size: overrides.batch_size.unwrap_or(self.batch_size),
            segment_size: overrides.segment_size.unwrap_or(self.segment_size),
            overlap: overrides.overlap.unwrap_or(self.overlap),
            aggression: overrides.aggression.unwrap_or(self.aggression),
            enable_denoise: overrides.enable_denoise.unwrap_or(self.enable_denoise),
            enable_tta: overrides.enable_tta.unwrap_or(self.enable_tta),
            enable_post_process: overrides
                .enable_post_process
                .unwrap_or(self.enable_post_process),
            post_process_threshold: overrides
                .post_process_threshold
                .unwrap_or(self.post_process_threshold),
            high_end_process: overrides.high_end_process.unwrap_or(self.high_end_process),
            use_autocast: overrides.use_autocast.unwrap_or(self.use_autocast),
        }
    }
}

/// Partial parameter patch; absent fields keep the base value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "window_size")]
    pub segment_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggression: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_denoise: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_tta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_post_process: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_process_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_end_process: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_autocast: Option<bool>,
}

impl ParamOverrides {
    /// Layer `other` on top of `self`; fields set in `other` win
    pub fn then(&self, other: &ParamOverrides) -> ParamOverrides {
        ParamOverrides {
            batch_size: other.batch_size.or(self.batch_size),
            segment_size: other.segment_size.or(self.segment_size),
            overlap: other.overlap.or(self.overlap),
            aggression: other.aggression.or(self.aggression),
            enable_denoise: other.enable_denoise.or(self.enable_denoise),
            enable_tta: other.enable_tta.or(self.enable_tta),
            enable_post_process: other.enable_post_process.or(self.enable_post_process),
            post_process_threshold: other.post_process_threshold.or(self.post_process_threshold),
            high_end_process: other.high_end_process.or(self.high_end_process),
            use_autocast: other.use_autocast.or(self.use_autocast),
        }
    }

    /// Reject values no engine accepts
    pub fn validate(&self, context: &str) -> Result<()> {
        let invalid = |what: String| Err(StudioError::ConfigError(format!("{}: {}", context, what)));

        if self.batch_size == Some(0) {
            return invalid("batch_size must be at least 1".to_string());
        }
        if self.segment_size == Some(0) {
            return invalid("segment_size must be at least 1".to_string());
        }
        if let Some(overlap) = self.overlap {
            if !overlap.is_finite() || overlap < 0.0 {
                return invalid(format!("overlap must be non-negative, got {}", overlap));
            }
        }
        if let Some(threshold) = self.post_process_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return invalid(format!(
                    "post_process_threshold must be within [0, 1], got {}",
                    threshold
                ));
            }
        }
        Ok(())
    }
}

/// Per-family override blocks from the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceParams {
    pub mdx: ParamOverrides,
    pub mdxc: ParamOverrides,
    pub vr: ParamOverrides,
    pub demucs: ParamOverrides,
    /// Overrides keyed by model file name, applied after the family block
    pub models: BTreeMap<String, ParamOverrides>,
    /// Overrides keyed by input file name, passed with every separation
    /// call for that track and applied last
    pub tracks: BTreeMap<String, ParamOverrides>,
}

impl InferenceParams {
    /// Configured family block
    pub fn family_block(&self, family: ModelFamily) -> &ParamOverrides {
        match family {
            ModelFamily::Mdx => &self.mdx,
            ModelFamily::Mdxc => &self.mdxc,
            ModelFamily::Vr => &self.vr,
            ModelFamily::Demucs => &self.demucs,
        }
    }

    /// Base parameters for a model: family defaults, family block, model block
    pub fn base_for(&self, model_id: &str, family: ModelFamily) -> EngineParams {
        let patch = match self.models.get(model_id) {
            Some(model) => self.family_block(family).then(model),
            None => self.family_block(family).clone(),
        };
        EngineParams::for_family(family).merged(&patch)
    }

    /// Per-call overrides configured for the input file `file_name`
    pub fn track_overrides(&self, file_name: &str) -> Option<&ParamOverrides> {
        self.tracks.get(file_name)
    }

    pub fn validate(&self) -> Result<()> {
        for family in [
            ModelFamily::Mdx,
            ModelFamily::Mdxc,
            ModelFamily::Vr,
            ModelFamily::Demucs,
        ] {
            self.family_block(family)
                .validate(&format!("inference.{}", family.name()))?;
        }
        for (model, block) in &self.models {
            block.validate(&format!("inference.models.\"{}\"", model))?;
        }
        for (track, block) in &self.tracks {
            block.validate(&format!("inference.tracks.\"{}\"", track))?;
        }
        Ok(())
    }
}
