//! Ensemble alignment and weighted mixing
//!
//! Separation models introduce small, model-specific latencies. Before two
//! vocal estimates are averaged they are brought into phase with the first
//! (reference) source using the peak of their full cross-correlation.
//!
//! # Lag convention
//!
//! `lag = argmax(corr) - (reference_len - 1)` where `corr` is the full
//! convolution of the reference with the time-reversed candidate. A
//! candidate that trails the reference by `L` samples yields `lag = -L`;
//! one that leads it yields a positive lag. Shifting the candidate by
//! `lag` (zeros in front for positive, dropped leading samples for
//! negative) puts it back in phase.

use crate::error::{Result, StudioError};
use crate::types::Track;
use realfft::RealFftPlanner;
use tracing::{debug, warn};

/// Lags beyond this many samples are treated as unreliable estimates
pub const MAX_LAG_SAMPLES: i64 = 2000;

/// Outcome of aligning one candidate against the reference
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Estimated lag in samples (see module docs for the sign)
    pub lag: i64,
    /// True when `|lag|` exceeded [`MAX_LAG_SAMPLES`] and the source was left unshifted
    pub rejected: bool,
    /// Shifted, zero-padded candidate trimmed to the common length
    pub aligned: Track,
}

/// Align every source to the first and return their weighted sum
///
/// Weights are normalized to sum to one, so only their ratios matter.
/// Sources must share a sample rate; mono sources are duplicated to stereo.
pub fn align_and_mix(sources: &[Track], weights: &[f32]) -> Result<Track> {
    let first = sources
        .first()
        .ok_or_else(|| StudioError::MixError("no sources to mix".to_string()))?;

    if sources.len() != weights.len() {
        return Err(StudioError::MixError(format!(
            "{} sources but {} weights",
            sources.len(),
            weights.len()
        )));
    }
    let norm_weights = normalize_weights(weights)?;

    let sample_rate = first.sample_rate;
    if let Some(other) = sources.iter().find(|s| s.sample_rate != sample_rate) {
        return Err(StudioError::MixError(format!(
            "sample rate mismatch ({} Hz vs {} Hz)",
            sample_rate, other.sample_rate
        )));
    }

    let stereo: Vec<Track> = sources.iter().map(Track::to_stereo).collect();
    let min_len = stereo.iter().map(Track::len).min().unwrap_or(0);
    let reference = stereo[0].truncated(min_len);

    let mut mixed = vec![vec![0.0f32; min_len]; 2];

    for (i, (source, weight)) in stereo.iter().zip(&norm_weights).enumerate() {
        let aligned = if i == 0 {
            reference.clone()
        } else {
            let result = align_to_reference(&reference, &source.truncated(min_len))?;
            if result.rejected {
                warn!(
                    "Source {} lag of {} samples exceeds +/-{}, mixing unshifted",
                    i, result.lag, MAX_LAG_SAMPLES
                );
            } else {
                debug!("Source {} aligned with lag {} samples", i, result.lag);
            }
            result.aligned
        };

        for (acc, ch) in mixed.iter_mut().zip(&aligned.channels) {
            for (a, s) in acc.iter_mut().zip(ch) {
                *a += s * weight;
            }
        }
    }

    Ok(Track::new(mixed, sample_rate))
}

/// Weighted average of two sources without alignment: `(a*wa + b*wb) / (wa + wb)`
pub fn mix_weighted(a: &Track, b: &Track, wa: f32, wb: f32) -> Result<Track> {
    let norm = normalize_weights(&[wa, wb])?;
    if a.sample_rate != b.sample_rate {
        return Err(StudioError::MixError(format!(
            "sample rate mismatch ({} Hz vs {} Hz)",
            a.sample_rate, b.sample_rate
        )));
    }

    let min_len = a.len().min(b.len());
    let a = a.to_stereo().truncated(min_len);
    let b = b.to_stereo().truncated(min_len);

    let channels = a
        .channels
        .iter()
        .zip(&b.channels)
        .map(|(ca, cb)| {
            ca.iter()
                .zip(cb)
                .map(|(x, y)| x * norm[0] + y * norm[1])
                .collect()
        })
        .collect();

    Ok(Track::new(channels, a.sample_rate))
}

/// Estimate the candidate's lag and shift it into phase with the reference
///
/// Both tracks are expected to have the same length and channel count.
pub fn align_to_reference(reference: &Track, candidate: &Track) -> Result<AlignmentResult> {
    let len = candidate.len();
    let lag = match (reference.channels.first(), candidate.channels.first()) {
        (Some(r), Some(c)) => estimate_lag(r, c)?,
        _ => 0,
    };

    if lag.abs() > MAX_LAG_SAMPLES {
        return Ok(AlignmentResult {
            lag,
            rejected: true,
            aligned: candidate.clone(),
        });
    }

    let channels = candidate
        .channels
        .iter()
        .map(|ch| shift(ch, lag, len))
        .collect();

    Ok(AlignmentResult {
        lag,
        rejected: false,
        aligned: Track::new(channels, candidate.sample_rate),
    })
}

/// Lag of `candidate` relative to `reference` from the full cross-correlation peak
pub fn estimate_lag(reference: &[f32], candidate: &[f32]) -> Result<i64> {
    if reference.is_empty() || candidate.is_empty() {
        return Ok(0);
    }
    let corr = cross_correlate(reference, candidate)?;
    let peak = corr
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
        .0;
    Ok(peak as i64 - (reference.len() as i64 - 1))
}

/// Full linear convolution of `reference` with reversed `candidate`
///
/// Real-input FFTs of a 5-smooth length keep the working set at three
/// buffers of roughly `out_len` values. The candidate spectrum is folded
/// into the reference spectrum in place and the inverse reuses the time
/// buffer.
fn cross_correlate(reference: &[f32], candidate: &[f32]) -> Result<Vec<f64>> {
    let out_len = reference.len() + candidate.len() - 1;
    let fft_len = fft_length(out_len);

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut buffer = forward.make_input_vec();
    for (dst, &s) in buffer.iter_mut().zip(reference) {
        *dst = s as f64;
    }
    let mut product = forward.make_output_vec();
    forward
        .process(&mut buffer, &mut product)
        .map_err(|e| StudioError::MixError(format!("forward FFT failed: {}", e)))?;

    buffer.fill(0.0);
    for (dst, &s) in buffer.iter_mut().zip(candidate.iter().rev()) {
        *dst = s as f64;
    }
    let mut spectrum = forward.make_output_vec();
    forward
        .process(&mut buffer, &mut spectrum)
        .map_err(|e| StudioError::MixError(format!("forward FFT failed: {}", e)))?;

    for (x, y) in product.iter_mut().zip(&spectrum) {
        *x *= *y;
    }
    drop(spectrum);

    // DC (and Nyquist for even lengths) must be purely real for the inverse
    if let Some(first) = product.first_mut() {
        first.im = 0.0;
    }
    if fft_len % 2 == 0 {
        if let Some(last) = product.last_mut() {
            last.im = 0.0;
        }
    }

    inverse
        .process(&mut product, &mut buffer)
        .map_err(|e| StudioError::MixError(format!("inverse FFT failed: {}", e)))?;

    let scale = fft_len as f64;
    buffer.truncate(out_len);
    buffer.iter_mut().for_each(|v| *v /= scale);
    Ok(buffer)
}

/// Smallest `2^a * 3^b * 5^c` that is at least `n`
fn fft_length(n: usize) -> usize {
    let n = n.max(1);
    let mut best = n.next_power_of_two();
    let mut p5 = 1usize;
    while p5 < best {
        let mut p35 = p5;
        while p35 < best {
            let mut candidate = p35;
            while candidate < n {
                candidate *= 2;
            }
            best = best.min(candidate);
            p35 *= 3;
        }
        p5 *= 5;
    }
    best
}

/// Shift by `lag` samples with zero padding, keeping `len` samples
fn shift(samples: &[f32], lag: i64, len: usize) -> Vec<f32> {
    let offset = lag.unsigned_abs() as usize;
    let mut out = Vec::with_capacity(len);
    if lag > 0 {
        out.extend(std::iter::repeat(0.0).take(offset.min(len)));
        out.extend(samples.iter().take(len - out.len()));
    } else if lag < 0 {
        out.extend(samples.iter().skip(offset).take(len));
    } else {
        out.extend(samples.iter().take(len));
    }
    out.resize(len, 0.0);
    out
}

fn normalize_weights(weights: &[f32]) -> Result<Vec<f32>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(StudioError::MixError(format!(
            "weights must be finite and non-negative, got {:?}",
            weights
        )));
    }
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return Err(StudioError::MixError(format!(
            "weights must not sum to zero, got {:?}",
            weights
        )));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44100;

    /// 220 Hz sine under a pseudo-random block envelope, so the
    /// correlation has a single dominant peak
    fn enveloped_sine(len: usize) -> Vec<f32> {
        let mut seed: u32 = 0x1234_5678;
        let mut gain = 0.5f32;
        (0..len)
            .map(|i| {
                if i % 1024 == 0 {
                    seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    gain = 0.1 + 0.8 * ((seed >> 8) as f32 / (1u32 << 24) as f32);
                }
                gain * (2.0 * PI * 220.0 * i as f32 / SR as f32).sin()
            })
            .collect()
    }

    fn delayed(samples: &[f32], delay: usize) -> Vec<f32> {
        let mut out = vec![0.0; delay.min(samples.len())];
        out.extend_from_slice(&samples[..samples.len() - out.len()]);
        out
    }

    #[test]
    fn test_recovers_delay() {
        let reference = enveloped_sine(SR as usize);
        for delay in [0usize, 1, 37, 480, 1999] {
            let candidate = delayed(&reference, delay);
            assert_eq!(estimate_lag(&reference, &candidate).unwrap(), -(delay as i64));
        }
    }

    #[test]
    fn test_recovers_advance() {
        let reference = enveloped_sine(SR as usize);
        let mut candidate = reference[300..].to_vec();
        candidate.resize(reference.len(), 0.0);
        assert_eq!(estimate_lag(&reference, &candidate).unwrap(), 300);
    }

    #[test]
    fn test_aligned_mix_peaks_at_zero_lag() {
        let reference = enveloped_sine(SR as usize);
        let candidate = delayed(&reference, 750);
        let sources = vec![
            Track::mono(reference.clone(), SR),
            Track::mono(candidate.clone(), SR),
        ];

        let result = align_to_reference(&sources[0].to_stereo(), &sources[1].to_stereo()).unwrap();
        assert_eq!(result.lag, -750);
        assert!(!result.rejected);

        let mixed = align_and_mix(&sources, &[1.0, 1.0]).expect("mix");
        assert_eq!(mixed.channel_count(), 2);
        assert_eq!(mixed.len(), reference.len());
        assert_eq!(estimate_lag(&reference, &mixed.channels[0]).unwrap(), 0);
        // Aligned region is the reference itself
        assert!((mixed.channels[0][1000] - reference[1000]).abs() < 1e-5);
    }

    #[test]
    fn test_outlier_lag_mixed_unshifted() {
        let reference = enveloped_sine(SR as usize);
        let candidate = delayed(&reference, 3000);
        let sources = vec![
            Track::mono(reference.clone(), SR),
            Track::mono(candidate.clone(), SR),
        ];

        let result = align_to_reference(&sources[0].to_stereo(), &sources[1].to_stereo()).unwrap();
        assert!(result.rejected);
        assert_eq!(result.lag, -3000);

        let mixed = align_and_mix(&sources, &[3.0, 1.0]).expect("mix");
        for i in (0..reference.len()).step_by(97) {
            let expected = 0.75 * reference[i] + 0.25 * candidate[i];
            assert!((mixed.channels[0][i] - expected).abs() < 1e-6);
            assert!((mixed.channels[1][i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_trims_to_shortest() {
        let a = Track::mono(vec![0.5; 1000], SR);
        let b = Track::mono(vec![0.5; 800], SR);
        let mixed = align_and_mix(&[a, b], &[1.0, 1.0]).expect("mix");
        assert_eq!(mixed.len(), 800);
    }

    #[test]
    fn test_mix_weighted_scale_invariant() {
        let a = Track::new(vec![enveloped_sine(4096), enveloped_sine(4096)], SR);
        let b = Track::mono(delayed(&enveloped_sine(4096), 100), SR);
        let base = mix_weighted(&a, &b, 0.6, 0.4).expect("mix");
        for k in [0.001f32, 2.5, 1000.0] {
            let scaled = mix_weighted(&a, &b, 0.6 * k, 0.4 * k).expect("mix");
            for (x, y) in base.channels[0].iter().zip(&scaled.channels[0]) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_mix_weighted_formula() {
        let a = Track::mono(vec![1.0; 4], SR);
        let b = Track::mono(vec![0.0; 6], SR);
        let mixed = mix_weighted(&a, &b, 3.0, 1.0).expect("mix");
        assert_eq!(mixed.len(), 4);
        assert!(mixed.channels[1].iter().all(|s| (s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_weights() {
        let a = Track::mono(vec![0.0; 4], SR);
        assert!(mix_weighted(&a, &a, 0.0, 0.0).is_err());
        assert!(align_and_mix(&[a.clone(), a.clone()], &[1.0]).is_err());
        assert!(align_and_mix(&[], &[]).is_err());
    }

    #[test]
    fn test_sample_rate_mismatch() {
        let a = Track::mono(vec![0.0; 4], 44100);
        let b = Track::mono(vec![0.0; 4], 48000);
        assert!(matches!(
            align_and_mix(&[a, b], &[1.0, 1.0]),
            Err(StudioError::MixError(_))
        ));
    }

    #[test]
    fn test_fft_length_is_five_smooth() {
        assert_eq!(fft_length(1), 1);
        assert_eq!(fft_length(7), 8);
        assert_eq!(fft_length(11), 12);
        assert_eq!(fft_length(1025), 1080);
        for n in [1usize, 17, 4097, 88_199, 26_460_001] {
            let len = fft_length(n);
            assert!(len >= n && len <= n.next_power_of_two());
            let mut rest = len;
            for f in [2, 3, 5] {
                while rest % f == 0 {
                    rest /= f;
                }
            }
            assert_eq!(rest, 1, "{} is not 5-smooth", len);
        }
    }

    #[test]
    fn test_odd_length_correlation() {
        // 2 * 1501 - 1 = 3001 samples, padded to an even 5-smooth length
        let reference = enveloped_sine(1501);
        let candidate = delayed(&reference, 11);
        assert_eq!(estimate_lag(&reference, &candidate).unwrap(), -11);
        assert_eq!(estimate_lag(&[1.0], &[1.0]).unwrap(), 0);
        assert_eq!(estimate_lag(&[], &[1.0]).unwrap(), 0);
    }

    #[test]
    fn test_shift_directions() {
        let s = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(shift(&s, 1, 4), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(shift(&s, -2, 4), vec![3.0, 4.0, 0.0, 0.0]);
        assert_eq!(shift(&s, 0, 4), s.to_vec());
    }
}
