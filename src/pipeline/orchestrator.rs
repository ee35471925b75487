//! Per-track stage sequencing
//!
//! Stages run strictly in order, each reading the previous stage's output
//! file and writing its own at a fixed path under the track directory:
//!
//! 0. normalize (optional)
//! 1. two-model vocal ensemble
//! 2. de-reverb
//! 3. noise gate
//! 4. main/backing split (optional)
//!
//! A stage whose outputs are already complete is skipped, which is what
//! makes an interrupted batch resumable.

use super::checkpoint::{Checkpoints, Stage};
use crate::audio;
use crate::config::{ModelIds, Settings, Weights};
use crate::dsp::{self, gate, normalize};
use crate::error::{Result, StudioError};
use crate::separation::{
    cached_outputs, cached_stem, find_by_keyword, identify, EngineFactory, InferenceParams,
    ParamOverrides, SeparationAdapter,
};
use crate::types::{FinalOutputs, StemPair};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name fragment of the vocal stem written by separation models
pub const VOCALS_KEYWORD: &str = "Vocals";
/// Name fragment of the dry stem written by the de-reverb model
pub const DRY_KEYWORD: &str = "No_Reverb";

/// Every path one track's run reads or writes
#[derive(Debug, Clone)]
pub struct TrackLayout {
    pub song_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub normalized: PathBuf,
    pub ensemble_dirs: [PathBuf; 2],
    pub ensemble: PathBuf,
    pub dereverb_dir: PathBuf,
    pub dry: PathBuf,
    pub clean: PathBuf,
    pub final_vocals: PathBuf,
    pub karaoke_dirs: [PathBuf; 2],
    pub main_vocal: PathBuf,
    pub backing_vocal: PathBuf,
}

impl TrackLayout {
    /// Layout for `input_path` under `output_root/<file stem>`
    pub fn new(input_path: &Path, output_root: &Path) -> Self {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track".to_string());
        let song_dir = output_root.join(stem);
        let raw_dir = song_dir.join("Raw_Artifacts");

        Self {
            normalized: raw_dir.join("00_Normalization").join("00_Normalized.wav"),
            ensemble_dirs: [raw_dir.join("01_A_RoF"), raw_dir.join("01_B_MDX")],
            ensemble: raw_dir.join("01_Ensemble_Vocals.wav"),
            dereverb_dir: raw_dir.join("02_DeReverb"),
            dry: raw_dir.join("02_Dry_Vocals.wav"),
            clean: raw_dir.join("03_Clean_Vocals.wav"),
            final_vocals: song_dir.join("03_vocals_final.wav"),
            karaoke_dirs: [raw_dir.join("04_A_RoF"), raw_dir.join("04_B_MDX")],
            main_vocal: song_dir.join("04_main_vocal.wav"),
            backing_vocal: song_dir.join("04_backing_vocal.wav"),
            song_dir,
            raw_dir,
        }
    }
}

/// Drives the stage sequence for one track at a time
pub struct PipelineOrchestrator {
    adapter: SeparationAdapter,
    checkpoints: Checkpoints,
    models: ModelIds,
    weights: Weights,
    inference: InferenceParams,
    enable_normalization: bool,
    enable_karaoke: bool,
    target_peak_db: f32,
    save_all_artifacts: bool,
}

impl PipelineOrchestrator {
    pub fn new(settings: &Settings, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            adapter: SeparationAdapter::new(
                factory,
                settings.model_dir.clone(),
                settings.output_format.clone(),
                settings.inference.clone(),
            ),
            checkpoints: Checkpoints::new(settings.checkpoint_mode),
            models: settings.models.clone(),
            weights: settings.weights.clone(),
            inference: settings.inference.clone(),
            enable_normalization: settings.enable_normalization,
            enable_karaoke: settings.enable_karaoke,
            target_peak_db: settings.target_peak_db,
            save_all_artifacts: settings.save_all_artifacts,
        }
    }

    /// Run every stage for `input_path`, reusing finished stages
    ///
    /// Returns the final output paths. `Raw_Artifacts` is removed only when
    /// artifact retention is off and every stage succeeded.
    pub fn run(&self, input_path: &Path, output_root: &Path) -> Result<FinalOutputs> {
        if !input_path.is_file() {
            return Err(StudioError::FileNotFound(input_path.to_path_buf()));
        }

        let layout = TrackLayout::new(input_path, output_root);
        fs::create_dir_all(&layout.raw_dir)
            .map_err(|e| StudioError::output_error(&layout.raw_dir, e))?;
        debug!("Checking for existing checkpoints in {}", layout.song_dir.display());

        let overrides = self.overrides_for(input_path);
        let current_input = self.normalize(input_path, &layout)?;
        let sample_rate = audio::probe_sample_rate(&current_input)?;

        self.ensemble(&current_input, sample_rate, &layout, overrides)?;
        self.dereverb(&layout, overrides)?;
        self.gate(sample_rate, &layout)?;
        let split = self.karaoke(sample_rate, &layout, overrides)?;

        if !self.save_all_artifacts {
            match fs::remove_dir_all(&layout.raw_dir) {
                Ok(()) => debug!("Removed {}", layout.raw_dir.display()),
                Err(e) => warn!("Could not remove {}: {}", layout.raw_dir.display(), e),
            }
        }

        Ok(FinalOutputs {
            vocals: layout.final_vocals.clone(),
            song_dir: layout.song_dir,
            split,
        })
    }

    /// Per-track inference overrides keyed by the input's file name
    fn overrides_for(&self, input_path: &Path) -> Option<&ParamOverrides> {
        let name = input_path.file_name()?.to_string_lossy();
        let overrides = self.inference.track_overrides(&name);
        if overrides.is_some() {
            info!("Applying inference overrides for {}", name);
        }
        overrides
    }

    // =========================================================================
    // Stage 0: normalization
    // =========================================================================

    fn normalize(&self, input_path: &Path, layout: &TrackLayout) -> Result<PathBuf> {
        if !self.enable_normalization {
            debug!("[0/4] Normalization disabled");
            return Ok(input_path.to_path_buf());
        }

        let stage = Stage::new("00_Normalization")
            .input(input_path)
            .output(&layout.normalized)
            .params(format!("target_peak_db={}", self.target_peak_db));

        if self.checkpoints.is_complete(&stage) {
            info!("[0/4] Found normalized file, skipping");
        } else {
            info!("[0/4] Pre-processing (normalization)");
            create_parent(&layout.normalized)?;
            normalize::normalize_file(input_path, &layout.normalized, self.target_peak_db)?;
            self.checkpoints.record(&stage)?;
        }
        Ok(layout.normalized.clone())
    }

    // =========================================================================
    // Stage 1: ensemble separation
    // =========================================================================

    fn ensemble(
        &self,
        input: &Path,
        sample_rate: u32,
        layout: &TrackLayout,
        overrides: Option<&ParamOverrides>,
    ) -> Result<()> {
        let models = [self.models.vocal_1.as_str(), self.models.vocal_2.as_str()];
        let stage = Stage::new("01_Ensemble_Vocals")
            .input(input)
            .output(&layout.ensemble)
            .params(call_params(
                &format!("{:?} {:?}", models, self.weights.ensemble),
                overrides,
            ));

        if self.checkpoints.is_complete(&stage) {
            info!("[1/4] Found ensemble vocals, skipping");
            return Ok(());
        }

        info!("[1/4] Vocal separation (ensemble)");
        let stage_ids = ["01_A_RoF", "01_B_MDX"];
        let mut sources = Vec::with_capacity(models.len());
        for ((model_id, dir), stage_id) in models.iter().zip(&layout.ensemble_dirs).zip(stage_ids) {
            let vocals =
                self.separate_or_reuse(input, dir, model_id, overrides, VOCALS_KEYWORD, stage_id)?;
            sources.push(audio::decode_at(&vocals, sample_rate)?);
        }

        let original_len = audio::decode(input)?.len();
        let mixed = dsp::align_and_mix(&sources, &self.weights.ensemble)?;
        audio::write_wav(&layout.ensemble, &mixed.truncated(original_len))?;
        self.checkpoints.record(&stage)
    }

    // =========================================================================
    // Stage 2: de-reverb
    // =========================================================================

    fn dereverb(&self, layout: &TrackLayout, overrides: Option<&ParamOverrides>) -> Result<()> {
        let stage = Stage::new("02_Dry_Vocals")
            .input(&layout.ensemble)
            .output(&layout.dry)
            .params(call_params(&self.models.dereverb, overrides));

        if self.checkpoints.is_complete(&stage) {
            info!("[2/4] Found dry vocals, skipping");
            return Ok(());
        }

        info!("[2/4] De-reverberation");
        let result = self.separate_or_reuse(
            &layout.ensemble,
            &layout.dereverb_dir,
            &self.models.dereverb,
            overrides,
            DRY_KEYWORD,
            "02_DeReverb",
        );

        match result {
            Ok(dry) => place_as_wav(&dry, &layout.dry)?,
            Err(e) if e.is_separation_error() => {
                warn!("De-reverb failed, continuing with the ensemble vocals as dry signal: {}", e);
                audio::copy_atomic(&layout.ensemble, &layout.dry)?;
            }
            Err(e) => return Err(e),
        }
        self.checkpoints.record(&stage)
    }

    // =========================================================================
    // Stage 3: noise gate
    // =========================================================================

    fn gate(&self, sample_rate: u32, layout: &TrackLayout) -> Result<()> {
        let stage = Stage::new("03_Clean_Vocals")
            .input(&layout.dry)
            .output(&layout.clean)
            .output(&layout.final_vocals)
            .params(format!("sample_rate={}", sample_rate));

        if self.checkpoints.is_complete(&stage) {
            info!("[3/4] Found clean vocals, skipping");
            return Ok(());
        }

        info!("[3/4] Noise gate");
        gate::apply(&layout.dry, &layout.clean, sample_rate)?;
        audio::copy_atomic(&layout.clean, &layout.final_vocals)?;
        self.checkpoints.record(&stage)
    }

    // =========================================================================
    // Stage 4: main/backing split
    // =========================================================================

    fn karaoke(
        &self,
        sample_rate: u32,
        layout: &TrackLayout,
        overrides: Option<&ParamOverrides>,
    ) -> Result<Option<StemPair>> {
        if !self.enable_karaoke {
            info!("[4/4] Main/backing split disabled, skipping");
            return Ok(None);
        }

        let split = StemPair {
            main: layout.main_vocal.clone(),
            backing: layout.backing_vocal.clone(),
        };
        let stage = Stage::new("04_Karaoke")
            .input(&layout.clean)
            .output(&split.main)
            .output(&split.backing)
            .params(call_params(
                &format!(
                    "{} {} {:?}",
                    self.models.karaoke_rof, self.models.karaoke_mdx, self.weights.karaoke
                ),
                overrides,
            ));

        if self.checkpoints.is_complete(&stage) {
            info!("[4/4] Found main/backing split, skipping");
            return Ok(Some(split));
        }

        info!("[4/4] Main/backing split");
        let first = self.karaoke_pair(
            &layout.clean,
            &layout.karaoke_dirs[0],
            &self.models.karaoke_rof,
            overrides,
            "04_A_RoF",
        )?;
        let second = match self.karaoke_pair(
            &layout.clean,
            &layout.karaoke_dirs[1],
            &self.models.karaoke_mdx,
            overrides,
            "04_B_MDX",
        ) {
            Ok(pair) => Some(pair),
            Err(e) if e.is_separation_error() => {
                warn!(
                    "Second karaoke model {} failed, using {} alone: {}",
                    self.models.karaoke_mdx, self.models.karaoke_rof, e
                );
                None
            }
            Err(e) => return Err(e),
        };

        let load = |path: &Path| audio::decode_at(path, sample_rate);
        let (main, backing) = match second {
            Some(second) => {
                let [wa, wb] = self.weights.karaoke;
                (
                    dsp::mix_weighted(&load(&first.main)?, &load(&second.main)?, wa, wb)?,
                    dsp::mix_weighted(&load(&first.backing)?, &load(&second.backing)?, wa, wb)?,
                )
            }
            None => (load(&first.main)?, load(&first.backing)?),
        };

        audio::write_wav(&split.main, &main)?;
        audio::write_wav(&split.backing, &backing)?;
        self.checkpoints.record(&stage)?;
        Ok(Some(split))
    }

    /// Classify one karaoke model's outputs, running it unless two cached files exist
    fn karaoke_pair(
        &self,
        reference: &Path,
        dir: &Path,
        model_id: &str,
        overrides: Option<&ParamOverrides>,
        stage_id: &'static str,
    ) -> Result<StemPair> {
        let params = call_params(model_id, overrides);
        let cached = cached_outputs(dir, self.adapter.output_extension());
        if cached.len() >= 2 {
            let stage = Stage::new(stage_id)
                .input(reference)
                .outputs(cached.iter().cloned())
                .params(params.as_str());
            if self.checkpoints.is_complete(&stage) {
                info!("Using cached output from {}", dir.display());
                return identify(&cached, reference);
            }
        }

        info!("Running {}", model_id);
        let outputs = self.adapter.separate(reference, dir, model_id, overrides)?;
        self.checkpoints.record(
            &Stage::new(stage_id)
                .input(reference)
                .outputs(outputs.iter().cloned())
                .params(params),
        )?;
        identify(&outputs, reference)
    }

    /// Locate `keyword` among cached outputs in `dir`, or run `model_id` into `dir`
    fn separate_or_reuse(
        &self,
        input: &Path,
        dir: &Path,
        model_id: &str,
        overrides: Option<&ParamOverrides>,
        keyword: &str,
        stage_id: &'static str,
    ) -> Result<PathBuf> {
        let params = call_params(model_id, overrides);
        if let Some(cached) = cached_stem(dir, self.adapter.output_extension(), keyword) {
            let stage = Stage::new(stage_id)
                .input(input)
                .output(&cached)
                .params(params.as_str());
            if self.checkpoints.is_complete(&stage) {
                info!("Found {} output, using cached file", model_id);
                return Ok(cached);
            }
        }

        let outputs = self.adapter.separate(input, dir, model_id, overrides)?;
        let stem = find_by_keyword(&outputs, keyword, dir)?;
        self.checkpoints
            .record(&Stage::new(stage_id).input(input).output(&stem).params(params))?;
        Ok(stem)
    }
}

/// Fingerprint parameters of a separating stage, including per-track overrides
fn call_params(base: &str, overrides: Option<&ParamOverrides>) -> String {
    match overrides {
        Some(overrides) => format!("{} {:?}", base, overrides),
        None => base.to_string(),
    }
}

/// Put `src` at `dst` as WAV, transcoding when the engine wrote another container
fn place_as_wav(src: &Path, dst: &Path) -> Result<()> {
    let is_wav = src
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if is_wav {
        audio::copy_atomic(src, dst)
    } else {
        audio::write_wav(dst, &audio::decode(src)?)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| StudioError::output_error(parent, e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        let layout = TrackLayout::new(Path::new("/music/My Song.mp3"), Path::new("/out"));
        assert_eq!(layout.song_dir, PathBuf::from("/out/My Song"));
        assert_eq!(
            layout.normalized,
            PathBuf::from("/out/My Song/Raw_Artifacts/00_Normalization/00_Normalized.wav")
        );
        assert_eq!(
            layout.ensemble_dirs[1],
            PathBuf::from("/out/My Song/Raw_Artifacts/01_B_MDX")
        );
        assert_eq!(layout.final_vocals, PathBuf::from("/out/My Song/03_vocals_final.wav"));
        assert_eq!(layout.backing_vocal, PathBuf::from("/out/My Song/04_backing_vocal.wav"));
    }

    #[test]
    fn test_track_overrides_change_stage_params() {
        let overrides = ParamOverrides {
            aggression: Some(8),
            ..Default::default()
        };
        assert_eq!(call_params("UVR_MDXNET_KARA_2.onnx", None), "UVR_MDXNET_KARA_2.onnx");
        assert_ne!(
            call_params("UVR_MDXNET_KARA_2.onnx", Some(&overrides)),
            call_params("UVR_MDXNET_KARA_2.onnx", None)
        );
    }
}
