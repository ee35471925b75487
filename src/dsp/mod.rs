//! Signal combination and cleanup
//!
//! - `align`: cross-correlation alignment and weighted mixing of stem estimates
//! - `gate`: adaptive envelope noise gate
//! - `normalize`: peak limiting for the pre-processing stage

pub mod align;
pub mod gate;
pub mod normalize;

pub use align::{align_and_mix, mix_weighted, AlignmentResult, MAX_LAG_SAMPLES};
pub use gate::{GateEnvelope, GateThresholds};
pub use normalize::normalize_peak;
