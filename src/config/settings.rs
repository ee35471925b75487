//! Runtime configuration settings
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! environment variables, then CLI flags. Validation runs once all layers
//! are applied, before any track is touched.

use crate::error::{Result, StudioError};
use crate::pipeline::checkpoint::CheckpointMode;
use crate::separation::{InferenceParams, ModelFamily};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "studio.toml";

/// Containers the engine may write and the decoder can read back
pub const OUTPUT_FORMATS: &[&str] = &["wav", "flac", "mp3"];

/// Runtime settings for the separation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory scanned for input tracks
    pub input_dir: PathBuf,
    /// Root of the per-track output directories
    pub output_dir: PathBuf,
    /// Model weight cache handed to the engine
    pub model_dir: PathBuf,
    /// Only process files matching this glob (`*`, `?`, `[...]`)
    pub target_filename: Option<String>,
    /// Pause between tracks, in seconds
    pub cooldown_secs: u64,
    /// Keep `Raw_Artifacts` after a successful run
    pub save_all_artifacts: bool,
    /// Peak-normalize the input before separation
    pub enable_normalization: bool,
    /// Run the main/backing split
    pub enable_karaoke: bool,
    /// Peak ceiling for normalization, in dBFS
    pub target_peak_db: f32,
    /// Container the engine writes stems in
    pub output_format: String,
    /// How cached stage outputs are trusted
    pub checkpoint_mode: CheckpointMode,
    /// Separation executable
    pub engine_program: String,
    pub models: ModelIds,
    pub weights: Weights,
    pub inference: InferenceParams,

    /// Show progress bars
    #[serde(skip)]
    pub show_progress: bool,
    /// Dry run mode - list files without processing
    #[serde(skip)]
    pub dry_run: bool,
}

/// Model file names used by each stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelIds {
    pub vocal_1: String,
    pub vocal_2: String,
    pub dereverb: String,
    pub karaoke_rof: String,
    pub karaoke_mdx: String,
}

impl Default for ModelIds {
    fn default() -> Self {
        Self {
            vocal_1: "model_bs_roformer_ep_317_sdr_12.9755.ckpt".to_string(),
            vocal_2: "UVR-MDX-NET-Voc_FT.onnx".to_string(),
            dereverb: "Reverb_HQ_By_FoxJoy.onnx".to_string(),
            karaoke_rof: "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt".to_string(),
            karaoke_mdx: "UVR_MDXNET_KARA_2.onnx".to_string(),
        }
    }
}

impl ModelIds {
    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("vocal_1", &self.vocal_1),
            ("vocal_2", &self.vocal_2),
            ("dereverb", &self.dereverb),
            ("karaoke_rof", &self.karaoke_rof),
            ("karaoke_mdx", &self.karaoke_mdx),
        ]
    }
}

/// Mixing weights, `[first model, second model]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    pub ensemble: [f32; 2],
    pub karaoke: [f32; 2],
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            ensemble: [1.0, 1.0],
            karaoke: [0.6, 0.4],
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./files"),
            output_dir: PathBuf::from("./studio_output"),
            model_dir: PathBuf::from("./models"),
            target_filename: None,
            cooldown_secs: 1,
            save_all_artifacts: true,
            enable_normalization: true,
            enable_karaoke: true,
            target_peak_db: -1.0,
            output_format: "wav".to_string(),
            checkpoint_mode: CheckpointMode::Presence,
            engine_program: crate::separation::command::DEFAULT_PROGRAM.to_string(),
            models: ModelIds::default(),
            weights: Weights::default(),
            inference: InferenceParams::default(),
            show_progress: true,
            dry_run: false,
        }
    }
}

impl Settings {
    /// Build settings from every layer, ending with the CLI
    pub fn load(cli: &super::cli::Cli) -> Result<Self> {
        let mut settings = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML configuration file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StudioError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings = Self::from_toml(&text)
            .map_err(|e| StudioError::ConfigError(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("INPUT_DIR") {
            self.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("TARGET_FILENAME") {
            let name = name.trim();
            self.target_filename = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(secs) = lookup("COOLDOWN_SECONDS") {
            self.cooldown_secs = secs.trim().parse().map_err(|_| {
                StudioError::ConfigError(format!(
                    "COOLDOWN_SECONDS must be a whole number of seconds, got '{}'",
                    secs
                ))
            })?;
        }
        if let Some(flag) = lookup("SAVE_ALL_ARTIFACTS") {
            self.save_all_artifacts = parse_bool(&flag).ok_or_else(|| {
                StudioError::ConfigError(format!(
                    "SAVE_ALL_ARTIFACTS must be true or false, got '{}'",
                    flag
                ))
            })?;
        }
        Ok(())
    }

    /// Apply CLI flags; only flags the user passed override earlier layers
    pub fn apply_cli(&mut self, cli: &super::cli::Cli) {
        if let Some(dir) = &cli.input {
            self.input_dir = dir.clone();
        }
        if let Some(dir) = &cli.output {
            self.output_dir = dir.clone();
        }
        if let Some(dir) = &cli.model_dir {
            self.model_dir = dir.clone();
        }
        if let Some(name) = &cli.target {
            self.target_filename = Some(name.clone());
        }
        if let Some(secs) = cli.cooldown {
            self.cooldown_secs = secs;
        }
        if cli.clean_artifacts {
            self.save_all_artifacts = false;
        }
        if cli.no_normalize {
            self.enable_normalization = false;
        }
        if cli.no_karaoke {
            self.enable_karaoke = false;
        }
        if let Some(format) = &cli.output_format {
            self.output_format = format.to_lowercase();
        }
        if let Some(mode) = cli.checkpoint {
            self.checkpoint_mode = mode;
        }
        if let Some(program) = &cli.engine {
            self.engine_program = program.clone();
        }
        self.show_progress = !cli.quiet;
        self.dry_run = cli.dry_run;
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.target_peak_db.is_finite() || self.target_peak_db > 0.0 {
            return Err(StudioError::ConfigError(format!(
                "target_peak_db must be at or below 0 dBFS, got {}",
                self.target_peak_db
            )));
        }

        if !OUTPUT_FORMATS.contains(&self.output_format.as_str()) {
            return Err(StudioError::ConfigError(format!(
                "output_format '{}' is not supported (use one of: {})",
                self.output_format,
                OUTPUT_FORMATS.join(", ")
            )));
        }

        if self.engine_program.trim().is_empty() {
            return Err(StudioError::ConfigError("engine_program is empty".to_string()));
        }

        for (stage, model_id) in self.models.entries() {
            if ModelFamily::from_model_id(model_id).is_none() {
                return Err(StudioError::ConfigError(format!(
                    "models.{} = '{}' has no recognised model extension (.onnx, .ckpt, .pth, .yaml)",
                    stage, model_id
                )));
            }
        }

        for (name, pair) in [
            ("weights.ensemble", self.weights.ensemble),
            ("weights.karaoke", self.weights.karaoke),
        ] {
            if pair.iter().any(|w| !w.is_finite() || *w < 0.0) || pair.iter().sum::<f32>() <= 0.0 {
                return Err(StudioError::ConfigError(format!(
                    "{} must be non-negative with a positive sum, got {:?}",
                    name, pair
                )));
            }
        }

        self.inference.validate()
    }

    /// Serializable view embedded in `process_info.json`
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
