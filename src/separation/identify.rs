//! Main/backing classification of karaoke outputs
//!
//! Karaoke models name their outputs inconsistently, so the lead vocal is
//! picked by content instead: the candidate most similar to the cleaned
//! vocal (largest dot product) is the main stem, the runner-up is backing.

use crate::audio;
use crate::error::{Result, StudioError};
use crate::types::StemPair;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Classify `candidates` against the mono `reference` file
///
/// With a single candidate it is returned as both main and backing.
pub fn identify(candidates: &[PathBuf], reference: &Path) -> Result<StemPair> {
    if candidates.is_empty() {
        return Err(StudioError::EmptyCandidateList);
    }

    let reference_track = audio::decode(reference)?;
    let rate = reference_track.sample_rate;
    let reference_mono = reference_track.to_mono();

    let signals = candidates
        .iter()
        .map(|path| Ok(audio::decode_at(path, rate)?.to_mono()))
        .collect::<Result<Vec<_>>>()?;

    let ranking = rank_by_similarity(&reference_mono, &signals);
    for (index, score) in &ranking {
        debug!("Similarity {:.4} for {}", score, candidates[*index].display());
    }

    let main = candidates[ranking[0].0].clone();
    let backing = match ranking.get(1) {
        Some((index, _)) => candidates[*index].clone(),
        None => {
            warn!(
                "Only one karaoke output ({}); using it as both main and backing",
                main.display()
            );
            main.clone()
        }
    };

    Ok(StemPair { main, backing })
}

/// Candidate indices ordered by descending similarity to `reference`
///
/// Similarity is the dot product over the overlapping range. Ties keep
/// input order.
pub fn rank_by_similarity(reference: &[f32], candidates: &[Vec<f32>]) -> Vec<(usize, f64)> {
    let mut scored: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| (i, dot(reference, candidate)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Track;
    use tempfile::TempDir;

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 330.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect()
    }

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((state >> 8) as f32 / (1u32 << 24) as f32 - 0.5) * 0.2
            })
            .collect()
    }

    #[test]
    fn test_copy_of_reference_ranks_first() {
        let reference = tone(4096);
        let candidates = vec![noise(4096, 7), reference.clone()];
        let ranking = rank_by_similarity(&reference, &candidates);
        assert_eq!(ranking[0].0, 1);
        assert_eq!(ranking[1].0, 0);
    }

    #[test]
    fn test_ranking_is_deterministic_on_ties() {
        let reference = vec![0.0f32; 16];
        let candidates = vec![vec![1.0; 16], vec![0.5; 16], vec![0.25; 16]];
        let ranking = rank_by_similarity(&reference, &candidates);
        let order: Vec<usize> = ranking.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_overlap_only() {
        let reference = vec![1.0f32; 4];
        let ranking = rank_by_similarity(&reference, &[vec![1.0; 100], vec![2.0; 3]]);
        assert_eq!(ranking[0], (1, 6.0));
        assert_eq!(ranking[1], (0, 4.0));
    }

    #[test]
    fn test_empty_candidates() {
        let result = identify(&[], Path::new("/nonexistent/reference.wav"));
        assert!(matches!(result, Err(StudioError::EmptyCandidateList)));
    }

    #[test]
    fn test_identify_files() {
        let temp = TempDir::new().unwrap();
        let reference = temp.path().join("reference.wav");
        let lead = temp.path().join("song_(Vocals).wav");
        let backing = temp.path().join("song_(Instrumental).wav");

        audio::write_wav(&reference, &Track::mono(tone(8192), 44100)).unwrap();
        audio::write_wav(&lead, &Track::mono(tone(8192), 44100)).unwrap();
        audio::write_wav(&backing, &Track::mono(noise(8192, 3), 44100)).unwrap();

        let pair = identify(&[backing.clone(), lead.clone()], &reference).unwrap();
        assert_eq!(pair.main, lead);
        assert_eq!(pair.backing, backing);
    }

    #[test]
    fn test_single_candidate_is_both() {
        let temp = TempDir::new().unwrap();
        let reference = temp.path().join("reference.wav");
        let only = temp.path().join("only.wav");
        audio::write_wav(&reference, &Track::mono(tone(2048), 44100)).unwrap();
        audio::write_wav(&only, &Track::mono(tone(2048), 44100)).unwrap();

        let pair = identify(&[only.clone()], &reference).unwrap();
        assert_eq!(pair.main, only);
        assert_eq!(pair.backing, only);
    }
}
