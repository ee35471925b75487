//! Audio decoding using symphonia
//!
//! Decodes audio files to planar f32 tracks at their native rate, with
//! optional rubato resampling when a stage needs a common rate.

use crate::error::{Result, StudioError};
use crate::types::Track;
use rubato::{FftFixedInOut, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Maximum file size we'll attempt to decode (2GB)
const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Decode an audio file at its native sample rate, keeping every channel
pub fn decode(path: &Path) -> Result<Track> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StudioError::FileNotFound(path.to_path_buf()),
        _ => StudioError::decode_error(path, format!("Failed to read file metadata: {}", e)),
    })?;

    if metadata.len() > MAX_FILE_SIZE {
        return Err(StudioError::decode_error(
            path,
            format!(
                "File too large ({:.1} GB). Maximum supported size is 2 GB.",
                metadata.len() as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
        ));
    }

    let (mut format, track_id, codec_params) = open_format(path)?;

    let source_sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    debug!(
        "Decoding: {} @ {}Hz, {} channels",
        path.display(),
        source_sample_rate,
        channels
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| StudioError::decode_error(path, format!("Failed to create decoder: {}", e)))?;

    // Collect all interleaved samples
    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break; // End of stream
            }
            Err(e) => {
                return Err(StudioError::decode_error(
                    path,
                    format!("Failed to read packet: {}", e),
                ));
            }
        };

        // Skip packets from other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Skip corrupted frames
                trace!("Skipping corrupted frame: {}", e);
                continue;
            }
            Err(e) => {
                return Err(StudioError::decode_error(path, format!("Decode error: {}", e)));
            }
        };

        let spec = *decoded.spec();
        channels = spec.channels.count();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        all_samples.extend(sample_buf.samples());
    }

    let track = Track::from_interleaved(&all_samples, channels, source_sample_rate);

    debug!(
        "Decoded {} frames ({:.2}s)",
        track.len(),
        track.duration()
    );

    Ok(track)
}

/// Decode and resample to `target_rate` when the source rate differs
pub fn decode_at(path: &Path, target_rate: u32) -> Result<Track> {
    let track = decode(path)?;
    Ok(resample_track(&track, target_rate))
}

/// Duration in seconds, read from the container header when available
///
/// Falls back to a full decode for streams that do not declare a frame count.
pub fn probe_duration(path: &Path) -> Result<f64> {
    let (_, _, codec_params) = open_format(path)?;
    match (codec_params.n_frames, codec_params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => Ok(frames as f64 / rate as f64),
        _ => Ok(decode(path)?.duration()),
    }
}

/// Native sample rate, read from the container header when available
pub fn probe_sample_rate(path: &Path) -> Result<u32> {
    let (_, _, codec_params) = open_format(path)?;
    match codec_params.sample_rate {
        Some(rate) if rate > 0 => Ok(rate),
        _ => Ok(decode(path)?.sample_rate),
    }
}

/// Probe a file and return the reader plus its first audio track
fn open_format(path: &Path) -> Result<(Box<dyn FormatReader>, u32, CodecParameters)> {
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StudioError::FileNotFound(path.to_path_buf()),
        _ => StudioError::decode_error(path, format!("Failed to open file: {}", e)),
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Provide a hint based on file extension
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| StudioError::decode_error(path, format!("Failed to probe format: {}", e)))?;

    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| StudioError::decode_error(path, "No audio tracks found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    Ok((format, track_id, codec_params))
}

/// Resample every channel of a track
pub fn resample_track(track: &Track, to_rate: u32) -> Track {
    if track.sample_rate == to_rate || track.is_empty() {
        return Track {
            channels: track.channels.clone(),
            sample_rate: to_rate,
        };
    }
    let channels = track
        .channels
        .iter()
        .map(|ch| resample(ch, track.sample_rate, to_rate))
        .collect();
    Track::new(channels, to_rate)
}

/// High-quality audio resampling using rubato
///
/// Uses FFT-based resampling with a proper anti-aliasing filter.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    const CHUNK_SIZE: usize = 1024;

    let mut resampler = match FftFixedInOut::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        1, // one channel at a time
    ) {
        Ok(r) => r,
        Err(e) => {
            debug!("Rubato initialization failed ({}), using fallback", e);
            return resample_linear_fallback(samples, from_rate, to_rate);
        }
    };

    let input_frames_per_chunk = resampler.input_frames_next();
    let output_frames_per_chunk = resampler.output_frames_next();

    let ratio = to_rate as f64 / from_rate as f64;
    let estimated_output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(estimated_output_len);

    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + input_frames_per_chunk).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();

        // Pad last chunk if needed
        if chunk.len() < input_frames_per_chunk {
            chunk.resize(input_frames_per_chunk, 0.0);
        }

        let input_channels = vec![chunk];

        match resampler.process(&input_channels, None) {
            Ok(resampled) => {
                if let Some(channel) = resampled.first() {
                    let valid_samples = if pos + input_frames_per_chunk > samples.len() {
                        let input_valid = samples.len() - pos;
                        let output_valid = (input_valid as f64 * ratio).ceil() as usize;
                        output_valid.min(output_frames_per_chunk)
                    } else {
                        output_frames_per_chunk
                    };
                    let safe_samples = valid_samples.min(channel.len());
                    output.extend_from_slice(&channel[..safe_samples]);
                }
            }
            Err(e) => {
                debug!("Rubato processing error ({}), using fallback for remaining", e);
                let remaining = resample_linear_fallback(&samples[pos..], from_rate, to_rate);
                output.extend(remaining);
                break;
            }
        }

        pos += input_frames_per_chunk;
    }

    output
}

/// Fallback linear interpolation resampler
fn resample_linear_fallback(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f64;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] * (1.0 - frac as f32) + samples[src_idx + 1] * frac as f32
        } else {
            samples[src_idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use tempfile::TempDir;

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let result = resample(&samples, 44100, 44100);
        assert_eq!(result, samples);
    }

    #[test]
    fn test_resample_downsample() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let result = resample(&samples, 44100, 22050);
        assert!((result.len() as f64 - 500.0).abs() < 2.0);
    }

    #[test]
    fn test_resample_fallback_works() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let result = resample_linear_fallback(&samples, 44100, 22050);
        assert!((result.len() as f64 - 50.0).abs() < 2.0);
    }

    #[test]
    fn test_resample_track_keeps_channels() {
        let track = Track::new(vec![vec![0.25; 2048], vec![-0.25; 2048]], 48000);
        let out = resample_track(&track, 44100);
        assert_eq!(out.channel_count(), 2);
        assert_eq!(out.sample_rate, 44100);
        assert!((out.len() as f64 - 1881.6).abs() < 4.0);
    }

    #[test]
    fn test_decode_written_stereo_wav() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("stereo.wav");
        let left: Vec<f32> = (0..4410).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        write_wav(&path, &Track::new(vec![left.clone(), right], 44100)).expect("write");

        let track = decode(&path).expect("decode");
        assert_eq!(track.channel_count(), 2);
        assert_eq!(track.len(), 4410);
        assert!((track.channels[0][100] - left[100]).abs() < 1e-3);
        assert!((track.channels[1][100] + left[100]).abs() < 1e-3);

        let duration = probe_duration(&path).expect("probe");
        assert!((duration - 0.1).abs() < 1e-6);
        assert_eq!(probe_sample_rate(&path).expect("rate"), 44100);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, StudioError::FileNotFound(_)));
    }
}
