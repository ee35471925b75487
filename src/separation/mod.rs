//! Model-based source separation
//!
//! - `engine`: the [`SeparationEngine`] / [`EngineFactory`] seam
//! - `command`: engine driving the `audio-separator` tool
//! - `params`: per-family parameters and override merging
//! - `adapter`: scoped, classified model invocation
//! - `identify`: main/backing classification by similarity

pub mod adapter;
pub mod command;
pub mod engine;
pub mod identify;
pub mod params;

pub use adapter::{cached_outputs, cached_stem, find_by_keyword, SeparationAdapter};
pub use command::CommandEngineFactory;
pub use engine::{EngineFactory, EngineSpec, SeparationEngine};
pub use identify::{identify, rank_by_similarity};
pub use params::{EngineParams, InferenceParams, ModelFamily, ParamOverrides};
