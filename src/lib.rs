//! studio-separator - Resumable vocal extraction for music production
//!
//! A command-line utility that extracts a clean lead vocal from each track
//! in a folder and optionally splits it into main and backing vocals.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - `config`: CLI argument parsing and layered runtime settings
//! - `discovery`: input file scanning
//! - `audio`: decoding (symphonia) and WAV encoding (hound)
//! - `dsp`: ensemble alignment, noise gate, peak normalization
//! - `separation`: model invocation through a swappable engine
//! - `pipeline`: checkpointed per-track stages and the batch driver
//! - `export`: `process_info.json` run reports
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use studio_separator::{config::Settings, pipeline, separation::CommandEngineFactory};
//!
//! let settings = Settings::default();
//! let factory = Arc::new(CommandEngineFactory::default());
//! let result = pipeline::run(&settings, factory).expect("Batch failed");
//! println!("Processed {} tracks", result.successful);
//! ```

pub mod audio;
pub mod config;
pub mod discovery;
pub mod dsp;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod separation;
pub mod types;

// Re-export key types at crate root
pub use error::{Result, StudioError};
pub use types::{FinalOutputs, StemPair, Track};
