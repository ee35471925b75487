//! Audio file I/O
//!
//! Decoding goes through symphonia, encoding through hound. All pipeline
//! stages exchange WAV files on disk.

pub mod decoder;
pub mod writer;

pub use decoder::{decode, decode_at, probe_duration, probe_sample_rate, resample_track};
pub use writer::{copy_atomic, write_wav};
