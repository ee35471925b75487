//! Core data types for studio-separator
//!
//! These types represent the domain model and flow through the pipeline.

use std::path::{Path, PathBuf};

// =============================================================================
// Audio buffer types
// =============================================================================

/// A decoded waveform, stored planar (one buffer per channel)
///
/// Every channel holds the same number of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Samples per channel, normalized to [-1.0, 1.0]
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Track {
    /// Build a track from planar channels, trimming them to a common length
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel track
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    /// Deinterleave `[L, R, L, R, ...]` style samples
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (ch, sample) in channels.iter_mut().zip(frame) {
                ch.push(*sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Number of frames (samples per channel)
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Check if track holds no frames
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        // Guard against division by zero - use 0 duration for invalid sample rate
        if self.sample_rate > 0 {
            self.len() as f64 / self.sample_rate as f64
        } else {
            0.0
        }
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.len())
                .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }

    /// Two-channel view: mono is duplicated, wider layouts keep the front pair
    pub fn to_stereo(&self) -> Track {
        match self.channels.len() {
            0 => Track::new(vec![Vec::new(), Vec::new()], self.sample_rate),
            1 => Track::new(
                vec![self.channels[0].clone(), self.channels[0].clone()],
                self.sample_rate,
            ),
            _ => Track::new(
                vec![self.channels[0].clone(), self.channels[1].clone()],
                self.sample_rate,
            ),
        }
    }

    /// Copy trimmed to at most `frames` frames
    pub fn truncated(&self, frames: usize) -> Track {
        Track {
            channels: self
                .channels
                .iter()
                .map(|ch| ch[..frames.min(ch.len())].to_vec())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

// =============================================================================
// Stage outputs
// =============================================================================

/// Main/backing classification of a karaoke split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemPair {
    pub main: PathBuf,
    pub backing: PathBuf,
}

/// Paths of the externally visible outputs of one track
#[derive(Debug, Clone)]
pub struct FinalOutputs {
    /// Track output directory (`output_root/<track_stem>`)
    pub song_dir: PathBuf,
    /// Gated lead vocal
    pub vocals: PathBuf,
    /// Main/backing split, when karaoke splitting ran
    pub split: Option<StemPair>,
}

// =============================================================================
// Supported formats
// =============================================================================

/// Input container formats accepted by the batch scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    M4a,
    Aiff,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "m4a" => Some(AudioFormat::M4a),
            "aiff" | "aif" => Some(AudioFormat::Aiff),
            _ => None,
        }
    }

    /// Check if a path has a supported extension
    pub fn is_supported_path(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_layout() {
        let track = Track::from_interleaved(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2, 44100);
        assert_eq!(track.channels[0], vec![0.1, 0.3, 0.5]);
        assert_eq!(track.channels[1], vec![0.2, 0.4, 0.6]);
        assert_eq!(track.len(), 3);
    }

    #[test]
    fn test_mono_duplicated_to_stereo() {
        let track = Track::mono(vec![0.5, -0.5], 44100).to_stereo();
        assert_eq!(track.channel_count(), 2);
        assert_eq!(track.channels[0], track.channels[1]);
    }

    #[test]
    fn test_to_mono_averages() {
        let track = Track::new(vec![vec![0.5, 0.8], vec![0.3, 0.2]], 44100);
        let mono = track.to_mono();
        assert!((mono[0] - 0.4).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_new_trims_ragged_channels() {
        let track = Track::new(vec![vec![0.0; 10], vec![0.0; 7]], 44100);
        assert_eq!(track.len(), 7);
        assert_eq!(track.channels[0].len(), 7);
    }

    #[test]
    fn test_duration_zero_rate() {
        assert_eq!(Track::mono(vec![0.0; 100], 0).duration(), 0.0);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(AudioFormat::from_extension("M4A"), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::from_extension("aif"), Some(AudioFormat::Aiff));
        assert_eq!(AudioFormat::from_extension("ogg"), None);
        assert!(AudioFormat::is_supported_path(Path::new("/music/song.flac")));
    }
}
