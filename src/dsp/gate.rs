//! Adaptive noise gate for de-reverberated vocals
//!
//! The gate follows the mono RMS envelope of the signal. Its thresholds
//! adapt to the track: the noise floor is the 10th percentile of the
//! non-silent frame levels, the close threshold sits 4 dB above it and the
//! open threshold at least 8 dB above close. The binary open/closed mask is
//! smoothed with a fast attack and slow release, then applied with a 5%
//! gain floor so the gate attenuates without ever hard-muting.

use crate::audio;
use crate::error::Result;
use crate::types::Track;
use std::path::Path;
use tracing::debug;

/// RMS analysis frame length in samples
pub const FRAME_LENGTH: usize = 2048;
/// Hop between analysis frames in samples
pub const HOP_LENGTH: usize = 512;
/// Level assigned to silent frames, relative to the loudest frame
pub const SILENCE_FLOOR_DB: f32 = -80.0;
/// Gain applied while the gate is fully closed
pub const GAIN_FLOOR: f32 = 0.05;

const NOISE_PERCENTILE: f64 = 10.0;
const CLOSE_OFFSET_DB: f32 = 4.0;
const HYSTERESIS_DB: f32 = 8.0;
const CLOSE_RANGE_DB: (f32, f32) = (-70.0, -40.0);
const OPEN_RANGE_DB: (f32, f32) = (-60.0, -30.0);
const ATTACK_SECS: f32 = 0.01;
const RELEASE_SECS: f32 = 0.60;
/// Minimum amplitude used when converting to dB
const AMIN: f32 = 1e-5;

/// Open/close levels derived from a noise-floor estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateThresholds {
    pub noise_floor_db: f32,
    pub close_db: f32,
    pub open_db: f32,
}

impl GateThresholds {
    pub fn from_noise_floor(noise_floor_db: f32) -> Self {
        let close_db = (noise_floor_db + CLOSE_OFFSET_DB).clamp(CLOSE_RANGE_DB.0, CLOSE_RANGE_DB.1);
        let open_db = (close_db + HYSTERESIS_DB).clamp(OPEN_RANGE_DB.0, OPEN_RANGE_DB.1);
        Self {
            noise_floor_db,
            close_db,
            open_db,
        }
    }
}

/// Per-frame gain mask in [0, 1]
#[derive(Debug, Clone)]
pub struct GateEnvelope {
    /// Smoothed gain per analysis frame
    pub frame_gains: Vec<f32>,
    pub thresholds: GateThresholds,
}

impl GateEnvelope {
    /// Linear interpolation of the frame mask to `len` samples
    ///
    /// Frame `i` sits at sample `i * HOP_LENGTH`; samples past the last
    /// frame hold its value.
    pub fn per_sample(&self, len: usize) -> Vec<f32> {
        let frames = &self.frame_gains;
        match frames.len() {
            0 => vec![0.0; len],
            1 => vec![frames[0]; len],
            n => (0..len)
                .map(|j| {
                    let pos = j as f64 / HOP_LENGTH as f64;
                    let idx = pos.floor() as usize;
                    if idx + 1 >= n {
                        frames[n - 1]
                    } else {
                        let frac = (pos - idx as f64) as f32;
                        frames[idx] + (frames[idx + 1] - frames[idx]) * frac
                    }
                })
                .collect(),
        }
    }
}

/// Gate an audio file, resampling it to `sample_rate` first
pub fn apply(input_path: &Path, output_path: &Path, sample_rate: u32) -> Result<()> {
    let track = audio::decode_at(input_path, sample_rate)?;
    let gated = gate_track(&track);
    audio::write_wav(output_path, &gated)
}

/// Apply the adaptive gate to every channel of a track
pub fn gate_track(track: &Track) -> Track {
    let envelope = compute_envelope(&track.to_mono(), track.sample_rate);
    debug!(
        "Gate thresholds: floor {:.1} dB, close {:.1} dB, open {:.1} dB",
        envelope.thresholds.noise_floor_db,
        envelope.thresholds.close_db,
        envelope.thresholds.open_db
    );

    let mask = envelope.per_sample(track.len());
    let channels = track
        .channels
        .iter()
        .map(|ch| {
            ch.iter()
                .zip(&mask)
                .map(|(s, m)| s * (m * (1.0 - GAIN_FLOOR) + GAIN_FLOOR))
                .collect()
        })
        .collect();

    Track::new(channels, track.sample_rate)
}

/// Derive the smoothed gate envelope from a mono signal
pub fn compute_envelope(mono: &[f32], sample_rate: u32) -> GateEnvelope {
    let levels = rms_db(mono);
    let thresholds = GateThresholds::from_noise_floor(noise_floor(&levels));
    let mask = gate_states(&levels, &thresholds);
    let frame_gains = smooth(&mask, sample_rate);
    GateEnvelope {
        frame_gains,
        thresholds,
    }
}

/// Frame RMS in dB relative to the loudest frame, floored at -80 dB
///
/// Frames are centered on multiples of the hop, zero-padded at the edges.
pub fn rms_db(mono: &[f32]) -> Vec<f32> {
    let n_frames = 1 + mono.len() / HOP_LENGTH;
    let half = (FRAME_LENGTH / 2) as i64;

    let rms: Vec<f32> = (0..n_frames)
        .map(|i| {
            let center = (i * HOP_LENGTH) as i64;
            let start = (center - half).max(0) as usize;
            let end = ((center + half).max(0) as usize).min(mono.len());
            let energy: f64 = mono
                .get(start..end)
                .unwrap_or(&[])
                .iter()
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            (energy / FRAME_LENGTH as f64).sqrt() as f32
        })
        .collect();

    let reference = rms.iter().copied().fold(0.0f32, f32::max).max(AMIN);
    let ref_db = 20.0 * reference.log10();
    rms.iter()
        .map(|&r| (20.0 * r.max(AMIN).log10() - ref_db).max(SILENCE_FLOOR_DB))
        .collect()
}

/// 10th percentile of frames above the silence floor
fn noise_floor(levels: &[f32]) -> f32 {
    let mut valid: Vec<f32> = levels
        .iter()
        .copied()
        .filter(|&db| db > SILENCE_FLOOR_DB)
        .collect();
    if valid.is_empty() {
        return SILENCE_FLOOR_DB;
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    percentile(&valid, NOISE_PERCENTILE)
}

/// Linear-interpolated percentile of sorted data
fn percentile(sorted: &[f32], pct: f64) -> f32 {
    let pos = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = (pos - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Two-state hysteresis gate over frame levels
fn gate_states(levels: &[f32], thresholds: &GateThresholds) -> Vec<f32> {
    let mut open = false;
    levels
        .iter()
        .map(|&db| {
            if open {
                if db < thresholds.close_db {
                    open = false;
                }
            } else if db > thresholds.open_db {
                open = true;
            }
            if open {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Per-hop one-pole coefficient for a time constant
fn hop_coefficient(seconds: f32, sample_rate: u32) -> f32 {
    let hops = (seconds * sample_rate as f32 / HOP_LENGTH as f32) as usize;
    1.0 / hops.max(1) as f32
}

/// Asymmetric one-pole smoothing: fast attack, slow release
fn smooth(mask: &[f32], sample_rate: u32) -> Vec<f32> {
    let attack = hop_coefficient(ATTACK_SECS, sample_rate);
    let release = hop_coefficient(RELEASE_SECS, sample_rate);
    let mut current = 0.0f32;
    mask.iter()
        .map(|&target| {
            let coeff = if target > current { attack } else { release };
            current += (target - current) * coeff;
            current
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44100;

    #[test]
    fn test_silence_stays_silent() {
        let track = Track::new(vec![vec![0.0; SR as usize], vec![0.0; SR as usize]], SR);
        let gated = gate_track(&track);
        assert_eq!(gated.len(), track.len());
        assert!(gated.channels.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_hysteresis_gap_holds_across_range() {
        let mut floor = -120.0f32;
        while floor <= 10.0 {
            let t = GateThresholds::from_noise_floor(floor);
            assert!(t.open_db >= t.close_db + HYSTERESIS_DB - 1e-4, "floor {}", floor);
            assert!((-70.0..=-40.0).contains(&t.close_db));
            assert!((-60.0..=-30.0).contains(&t.open_db));
            floor += 0.5;
        }
    }

    #[test]
    fn test_no_chatter_between_thresholds() {
        let t = GateThresholds::from_noise_floor(-60.0);
        let between = (t.close_db + t.open_db) / 2.0;
        // Loud, then hovering between close and open: stays open
        let mut levels = vec![0.0; 3];
        levels.extend(std::iter::repeat(between).take(50));
        let states = gate_states(&levels, &t);
        assert!(states.iter().all(|&s| s == 1.0));

        // Quiet, then hovering between: stays closed
        let mut levels = vec![-79.0; 3];
        levels.extend(std::iter::repeat(between).take(50));
        let states = gate_states(&levels, &t);
        assert!(states.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_state_machine_transitions() {
        let t = GateThresholds {
            noise_floor_db: -60.0,
            close_db: -50.0,
            open_db: -40.0,
        };
        let levels = [-60.0, -35.0, -45.0, -55.0, -45.0, -30.0];
        assert_eq!(gate_states(&levels, &t), vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_smoothing_coefficients() {
        // 10 ms at 44.1 kHz is under one hop: instant attack
        assert_eq!(hop_coefficient(ATTACK_SECS, SR), 1.0);
        // 600 ms is 51 hops
        assert!((hop_coefficient(RELEASE_SECS, SR) - 1.0 / 51.0).abs() < 1e-7);

        let smoothed = smooth(&[1.0, 0.0, 0.0], SR);
        assert_eq!(smoothed[0], 1.0);
        assert!(smoothed[1] > 0.97 && smoothed[1] < 1.0);
        assert!(smoothed[2] < smoothed[1]);
    }

    #[test]
    fn test_rms_db_shape() {
        let mono = vec![0.5f32; 5000];
        let levels = rms_db(&mono);
        assert_eq!(levels.len(), 1 + 5000 / HOP_LENGTH);
        assert!(levels.iter().all(|&db| (SILENCE_FLOOR_DB..=0.0).contains(&db)));
        assert!(levels.iter().any(|&db| db == 0.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = [0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];
        assert!((percentile(&data, 10.0) - 10.0).abs() < 1e-5);
        assert!((percentile(&[0.0, 10.0], 10.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_quiet_noise_attenuated_loud_passes() {
        // 1 s of faint noise-like signal followed by 1 s of loud tone
        let mut mono: Vec<f32> = (0..SR as usize)
            .map(|i| 0.0005 * ((i as f32 * 12.9898).sin() * 43758.547).fract())
            .collect();
        mono.extend((0..SR as usize).map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / SR as f32).sin()));
        let track = Track::mono(mono.clone(), SR);
        let gated = gate_track(&track);

        // Deep in the quiet section the floor gain applies
        let i = SR as usize / 2;
        assert!((gated.channels[0][i] - mono[i] * GAIN_FLOOR).abs() < 1e-6);
        // Deep in the loud section the signal passes untouched
        let j = SR as usize + SR as usize / 2;
        assert!((gated.channels[0][j] - mono[j]).abs() < 1e-4);
        // Never amplified
        for (g, s) in gated.channels[0].iter().zip(&mono) {
            assert!(g.abs() <= s.abs() + 1e-7);
        }
    }

    #[test]
    fn test_per_sample_interpolation() {
        let env = GateEnvelope {
            frame_gains: vec![0.0, 1.0],
            thresholds: GateThresholds::from_noise_floor(-80.0),
        };
        let mask = env.per_sample(HOP_LENGTH * 2);
        assert_eq!(mask[0], 0.0);
        assert!((mask[HOP_LENGTH / 2] - 0.5).abs() < 1e-6);
        assert_eq!(mask[HOP_LENGTH], 1.0);
        assert_eq!(mask[HOP_LENGTH * 2 - 1], 1.0);
    }
}
