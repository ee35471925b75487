//! Peak normalization for the optional pre-processing stage

use crate::audio;
use crate::error::Result;
use crate::types::Track;
use std::path::Path;
use tracing::debug;

/// Convert a dBFS level to linear amplitude
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Scale a track down so its peak does not exceed `target_db` dBFS
///
/// Tracks already at or below the target, and silent tracks, are returned
/// unchanged; quiet material is never boosted.
pub fn normalize_peak(track: &Track, target_db: f32) -> Track {
    let peak = track.peak();
    let target = db_to_amplitude(target_db);
    if peak <= 0.0 || peak <= target {
        return track.clone();
    }

    let gain = target / peak;
    debug!("Peak {:.4} above target {:.4}, applying gain {:.4}", peak, target, gain);
    Track {
        channels: track
            .channels
            .iter()
            .map(|ch| ch.iter().map(|s| s * gain).collect())
            .collect(),
        sample_rate: track.sample_rate,
    }
}

/// Normalize `input_path` into `output_path`
pub fn normalize_file(input_path: &Path, output_path: &Path, target_db: f32) -> Result<()> {
    let track = audio::decode(input_path)?;
    audio::write_wav(output_path, &normalize_peak(&track, target_db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loud_track_limited() {
        let track = Track::mono(vec![0.0, 1.0, -0.5], 44100);
        let out = normalize_peak(&track, -6.0);
        assert!((out.peak() - db_to_amplitude(-6.0)).abs() < 1e-6);
        assert!((out.channels[0][2] / out.channels[0][1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_quiet_track_untouched() {
        let track = Track::mono(vec![0.1, -0.2], 44100);
        assert_eq!(normalize_peak(&track, -1.0), track);
    }

    #[test]
    fn test_silence_untouched() {
        let track = Track::mono(vec![0.0; 8], 44100);
        assert_eq!(normalize_peak(&track, -1.0), track);
    }
}
