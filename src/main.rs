//! studio-separator CLI entry point

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use studio_separator::config::{Cli, Settings};
use studio_separator::pipeline;
use studio_separator::separation::CommandEngineFactory;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli);

    // Build settings from defaults, config file, environment and CLI
    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Validate inputs
    if let Err(e) = validate_inputs(&settings) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let factory = Arc::new(CommandEngineFactory::new(settings.engine_program.clone()));

    // Run the pipeline
    match pipeline::run(&settings, factory) {
        Ok(result) => {
            if settings.dry_run {
                return ExitCode::SUCCESS;
            }

            println!();
            if result.total_files == 0 {
                println!(
                    "No audio files found in {}. Check INPUT_DIR or --input.",
                    settings.input_dir.display()
                );
                return ExitCode::SUCCESS;
            }
            println!(
                "Summary: {} successful, {} failed (of {} total)",
                result.successful, result.failed, result.total_files
            );
            for dir in &result.outputs {
                println!("  {}", dir.display());
            }

            if result.failed > 0 {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter = cli.log_level().to_string().to_lowercase();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn validate_inputs(settings: &Settings) -> Result<(), String> {
    // Check input exists
    if !settings.input_dir.exists() {
        return Err(format!(
            "Input path does not exist: {}\n\n  Tip: Set INPUT_DIR or pass --input.\n  Examples:\n    studio-separator -i ~/Music/Stems -o ./studio_output\n    studio-separator -i ./files --target 'My Song*'",
            settings.input_dir.display()
        ));
    }

    // Check output parent directory exists (we'll create the output dir itself)
    if let Some(parent) = settings.output_dir.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!(
                "Output parent directory does not exist: {}\n\n  Tip: The output directory will be created automatically,\n  but its parent directory must exist.\n  Example: mkdir -p {}",
                parent.display(),
                parent.display()
            ));
        }
    }

    Ok(())
}
