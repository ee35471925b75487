//! Batch processing
//!
//! Discovers input tracks and runs the [`PipelineOrchestrator`] on each one
//! in turn. A failing track is logged and counted; the batch moves on to the
//! next file.

pub mod checkpoint;
pub mod orchestrator;

pub use checkpoint::{CheckpointMode, Checkpoints, Stage};
pub use orchestrator::{PipelineOrchestrator, TrackLayout};

use crate::audio;
use crate::config::Settings;
use crate::discovery::{self, DiscoveredFile};
use crate::error::Result;
use crate::export::{self, ProcessInfo};
use crate::separation::EngineFactory;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pipeline result summary
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    /// Output directories of the tracks that finished
    pub outputs: Vec<PathBuf>,
}

/// Run the full batch
pub fn run(settings: &Settings, factory: Arc<dyn EngineFactory>) -> Result<PipelineResult> {
    let pipeline_start = Instant::now();

    // Phase 1: Discovery
    info!("Scanning {} for audio files...", settings.input_dir.display());
    let files = discovery::scan(&settings.input_dir, settings.target_filename.as_deref())?;

    if files.is_empty() {
        return Ok(PipelineResult::default());
    }

    // Dry run mode - show files and exit
    if settings.dry_run {
        return Ok(run_dry_run(&files, settings));
    }

    if factory.is_available() {
        info!("Separation engine: {}", factory.name());
    } else {
        warn!(
            "Separation engine {} is not available; only fully cached stages can complete",
            factory.name()
        );
    }

    let orchestrator = PipelineOrchestrator::new(settings, factory);
    let snapshot = settings.snapshot()?;

    let progress_bar = if settings.show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut result = PipelineResult {
        total_files: files.len(),
        ..Default::default()
    };

    for (idx, file) in files.iter().enumerate() {
        let name = file.file_name();
        info!("Processing [{}/{}]: {}", idx + 1, files.len(), name);
        if let Some(ref pb) = progress_bar {
            pb.set_message(name.clone());
        }

        let start = Instant::now();
        match process_track(&orchestrator, file, settings, &snapshot, start) {
            Ok(song_dir) => {
                info!("Completed {} in {}", name, fmt_time(start.elapsed().as_secs_f64()));
                result.successful += 1;
                result.outputs.push(song_dir);
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Failed to process {}: {}", name, e);
                } else {
                    error!("Failed to process {}: {}", name, e);
                }
                result.failed += 1;
            }
        }

        if let Some(ref pb) = progress_bar {
            pb.inc(1);
        }

        if idx + 1 < files.len() && settings.cooldown_secs > 0 {
            debug!("Cooling down {}s", settings.cooldown_secs);
            std::thread::sleep(Duration::from_secs(settings.cooldown_secs));
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_with_message("done");
    }

    info!(
        "Total pipeline time: {}",
        fmt_time(pipeline_start.elapsed().as_secs_f64())
    );

    Ok(result)
}

/// Run one track and write its `process_info.json`
fn process_track(
    orchestrator: &PipelineOrchestrator,
    file: &DiscoveredFile,
    settings: &Settings,
    snapshot: &serde_json::Value,
    start: Instant,
) -> Result<PathBuf> {
    let duration = audio::probe_duration(&file.path)?;
    let outputs = orchestrator.run(&file.path, &settings.output_dir)?;

    let elapsed = start.elapsed().as_secs_f64();
    let info = ProcessInfo::new(&file.file_name(), duration, elapsed, snapshot.clone());
    export::write_process_info(&outputs.song_dir, &info)?;

    Ok(outputs.song_dir)
}

/// Dry run mode - show files that would be processed without processing
fn run_dry_run(files: &[DiscoveredFile], settings: &Settings) -> PipelineResult {
    println!();
    println!("=== DRY RUN MODE ===");
    println!();

    for file in files {
        let song_dir = TrackLayout::new(&file.path, &settings.output_dir).song_dir;
        println!(
            "  {} [{:?}] ({:.1} MB) -> {}",
            file.path.display(),
            file.format,
            file.size_bytes as f64 / (1024.0 * 1024.0),
            song_dir.display()
        );
    }

    println!();
    println!("Would process {} files", files.len());
    println!();
    println!("Would create per track:");
    println!("  03_vocals_final.wav");
    if settings.enable_karaoke {
        println!("  04_main_vocal.wav, 04_backing_vocal.wav");
    }
    println!("  process_info.json");
    if settings.save_all_artifacts {
        println!("  Raw_Artifacts/ (kept)");
    }
    println!();

    PipelineResult {
        total_files: files.len(),
        ..Default::default()
    }
}

/// `Xm YYs`
pub fn fmt_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}m {:02}s", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_time() {
        assert_eq!(fmt_time(0.0), "0m 00s");
        assert_eq!(fmt_time(65.9), "1m 05s");
        assert_eq!(fmt_time(3600.0), "60m 00s");
    }
}
