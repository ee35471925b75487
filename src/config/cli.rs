//! CLI argument parsing

use crate::pipeline::checkpoint::CheckpointMode;
use clap::Parser;
use std::path::PathBuf;

/// studio-separator - Resumable vocal extraction for music production
///
/// Extracts a clean lead vocal from each input track with a two-model
/// ensemble, de-reverb and an adaptive noise gate, then optionally splits it
/// into main and backing vocals. Interrupted runs resume from the last
/// finished stage.
#[derive(Parser, Debug, Default)]
#[command(name = "studio-separator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input directory to scan [env: INPUT_DIR]
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output root; one sub-directory per track [env: OUTPUT_DIR]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Model weight cache [env: MODEL_DIR]
    #[arg(short, long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Configuration file (defaults to ./studio.toml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only process files with this name; glob wildcards (`*`, `?`, `[...]`) allowed [env: TARGET_FILENAME]
    #[arg(short, long, value_name = "NAME")]
    pub target: Option<String>,

    /// Seconds to pause between tracks [env: COOLDOWN_SECONDS]
    #[arg(long, value_name = "SECS")]
    pub cooldown: Option<u64>,

    /// Delete Raw_Artifacts after a track finishes successfully
    #[arg(long, default_value = "false")]
    pub clean_artifacts: bool,

    /// Skip peak normalization
    #[arg(long, default_value = "false")]
    pub no_normalize: bool,

    /// Skip the main/backing vocal split
    #[arg(long, default_value = "false")]
    pub no_karaoke: bool,

    /// Container for stems written by the engine
    #[arg(long, value_name = "FORMAT")]
    #[arg(value_parser = ["wav", "flac", "mp3"])]
    pub output_format: Option<String>,

    /// How existing stage outputs are trusted on resume
    #[arg(long, value_enum, value_name = "MODE")]
    pub checkpoint: Option<CheckpointMode>,

    /// Separation executable to run
    #[arg(long, value_name = "PROGRAM")]
    pub engine: Option<String>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress bars)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Dry run - show files that would be processed without processing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

impl Cli {
    /// Get the log level based on verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_cli_overrides_file_and_env() {
        let cli = Cli::parse_from([
            "studio-separator",
            "-i",
            "/in",
            "--cooldown",
            "0",
            "--no-karaoke",
            "--checkpoint",
            "fingerprint",
            "--dry-run",
        ]);

        let mut settings = Settings::from_toml("cooldown_secs = 9\nenable_karaoke = true").unwrap();
        settings
            .apply_env(|key| (key == "INPUT_DIR").then(|| "/env".to_string()))
            .unwrap();
        settings.apply_cli(&cli);

        assert_eq!(settings.input_dir, PathBuf::from("/in"));
        assert_eq!(settings.cooldown_secs, 0);
        assert!(!settings.enable_karaoke);
        assert_eq!(settings.checkpoint_mode, CheckpointMode::Fingerprint);
        assert!(settings.dry_run);
    }

    #[test]
    fn test_unset_flags_keep_lower_layers() {
        let cli = Cli::parse_from(["studio-separator"]);
        let mut settings = Settings::from_toml("enable_normalization = false").unwrap();
        settings.apply_cli(&cli);
        assert!(!settings.enable_normalization);
        assert!(settings.save_all_artifacts);
        assert!(settings.show_progress);
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::parse_from(["studio-separator", "-vv"]);
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
        let cli = Cli::parse_from(["studio-separator", "-q"]);
        assert_eq!(cli.log_level(), tracing::Level::ERROR);
    }
}
