use crate::ErrorClass;
use crate::classifier::{ClassifierError, MelodyClassifier};
use crate::features::FeatureVector;
use crate::midi::Piece;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Invalid segmentation settings: {0}")]
    InvalidConfig(String),
    #[error("Invalid piece structure: {0}")]
    InvalidStructure(String),
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Classifier returned {value} for track {track}, expected a probability in [0, 1]")]
    BadProbability { track: usize, value: f64 },
    #[error("track {track}: energy curve has no positive frames, baseline energy is undefined")]
    DegenerateSignal { track: usize },
}

impl SegmentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidConfig(_) => ErrorClass::Input,
            Self::InvalidStructure(_) => ErrorClass::InvalidStructure,
            Self::Classifier(e) => e.class(),
            Self::BadProbability { .. } | Self::DegenerateSignal { .. } => ErrorClass::DegenerateSignal,
        }
    }
}

/// Chunking and thresholding settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Chunk length in seconds.
    pub chunk_sec: f64,
    /// Fraction of the track's mean active energy a chunk must exceed.
    pub melody_threshold: f64,
    /// Energy curve sampling rate (Hz).
    pub energy_fs: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            chunk_sec: 10.0,
            melody_threshold: 0.2,
            energy_fs: 100.0,
        }
    }
}

impl SegmentConfig {
    /// Frames per chunk, `floor(chunk_sec * energy_fs)`. Must be at least 1.
    pub fn chunk_len(&self) -> Result<usize, SegmentError> {
        for (name, value) in [("chunk_sec", self.chunk_sec), ("energy_fs", self.energy_fs)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SegmentError::InvalidConfig(format!("{} must be positive, got {}", name, value)));
            }
        }
        let frames = self.chunk_sec * self.energy_fs;
        if !frames.is_finite() || frames < 1.0 {
            return Err(SegmentError::InvalidConfig(format!(
                "chunk of {}s at {}Hz spans less than one frame",
                self.chunk_sec, self.energy_fs
            )));
        }
        Ok(frames as usize)
    }

    pub fn validate(&self) -> Result<usize, SegmentError> {
        if !self.melody_threshold.is_finite() || self.melody_threshold < 0.0 {
            return Err(SegmentError::InvalidConfig(format!(
                "melody threshold must be a finite non-negative fraction, got {}",
                self.melody_threshold
            )));
        }
        self.chunk_len()
    }
}

/// Outcome of thresholding one energy curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSelection {
    /// Mean of the strictly positive frames.
    pub baseline_energy: f64,
    /// `baseline_energy * melody_threshold`; chunks must exceed it.
    pub min_energy: f64,
    /// Number of whole chunks in the curve.
    pub chunk_count: usize,
    /// Ascending indices of chunks whose mean energy exceeds `min_energy`.
    pub chunk_ids: Vec<usize>,
}

/// Threshold `curve` chunk by chunk.
///
/// Returns `None` when the curve has no positive frame (no baseline). A
/// trailing partial chunk is never classified.
pub fn select_chunks(curve: &[f64], chunk_len: usize, melody_threshold: f64) -> Option<ChunkSelection> {
    if chunk_len == 0 {
        return None;
    }

    let (sum, count) = curve
        .iter()
        .filter(|&&e| e > 0.0)
        .fold((0.0, 0usize), |(s, c), &e| (s + e, c + 1));
    if count == 0 {
        return None;
    }
    let baseline_energy = sum / count as f64;
    let min_energy = baseline_energy * melody_threshold;

    let chunk_ids: Vec<usize> = curve
        .chunks_exact(chunk_len)
        .enumerate()
        .filter(|(_, chunk)| chunk.iter().sum::<f64>() / chunk_len as f64 > min_energy)
        .map(|(i, _)| i)
        .collect();

    Some(ChunkSelection {
        baseline_energy,
        min_energy,
        chunk_count: curve.len() / chunk_len,
        chunk_ids,
    })
}

/// Index of the highest score; the first one wins ties.
pub fn select_melody_track(scores: &[f64]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &p)| match best {
            Some((_, b)) if p <= b => best,
            _ => Some((i, p)),
        })
        .map(|(i, _)| i)
}

/// Melody track decision and its chunking for one piece.
#[derive(Debug, Clone, PartialEq)]
pub struct MelodySelection {
    pub track: usize,
    pub probabilities: Vec<f64>,
    pub chunks: ChunkSelection,
}

impl MelodySelection {
    pub fn chunk_ids(&self) -> &[usize] {
        &self.chunks.chunk_ids
    }
}

/// Pick the melody track of `piece` and find its melody-bearing chunks.
///
/// `features` must hold one row per track, in track order.
pub fn segment_piece(
    piece: &Piece,
    features: &[FeatureVector],
    classifier: &dyn MelodyClassifier,
    config: &SegmentConfig,
) -> Result<MelodySelection, SegmentError> {
    let chunk_len = config.validate()?;

    if features.is_empty() {
        return Err(SegmentError::InvalidStructure("no feature rows to score".into()));
    }
    if features.len() != piece.track_count() {
        return Err(SegmentError::InvalidStructure(format!(
            "{} feature rows for {} tracks",
            features.len(),
            piece.track_count()
        )));
    }

    let probabilities = classifier.predict_matrix(features)?;
    if probabilities.len() != features.len() {
        return Err(SegmentError::InvalidStructure(format!(
            "classifier returned {} scores for {} rows",
            probabilities.len(),
            features.len()
        )));
    }
    if let Some((track, &value)) = probabilities
        .iter()
        .enumerate()
        .find(|&(_, &p)| !(0.0..=1.0).contains(&p))
    {
        return Err(SegmentError::BadProbability { track, value });
    }

    let track = select_melody_track(&probabilities)
        .ok_or_else(|| SegmentError::InvalidStructure("no scores".into()))?;
    log::debug!(
        "Melody track {} (p = {:.3}) of {}",
        track,
        probabilities[track],
        probabilities.len()
    );

    let curve = piece.tracks()[track].piano_roll(config.energy_fs).energy_curve();
    let chunks = select_chunks(&curve, chunk_len, config.melody_threshold)
        .ok_or(SegmentError::DegenerateSignal { track })?;

    Ok(MelodySelection {
        track,
        probabilities,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureConfig, extract_features};
    use crate::midi::loader::parse_piece;
    use crate::midi::loader::testing::{TrackSpec, build_smf, secs};
    use crate::midi::{Note, Track};

    /// Scores tracks by their own note density.
    struct DensityStub;

    impl MelodyClassifier for DensityStub {
        fn predict_melody_probability(&self, f: &FeatureVector) -> Result<f64, ClassifierError> {
            Ok(f.own.note_density / (1.0 + f.own.note_density))
        }
    }

    /// Returns fixed scores regardless of features.
    struct FixedScores(Vec<f64>);

    impl MelodyClassifier for FixedScores {
        fn predict_melody_probability(&self, _: &FeatureVector) -> Result<f64, ClassifierError> {
            Ok(0.0)
        }

        fn predict_matrix(&self, _: &[FeatureVector]) -> Result<Vec<f64>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    /// Track 0 silent for 2s then loud and dense; track 1 moderate throughout.
    fn two_halves_piece() -> Piece {
        let loud: Vec<Note> = (0..16)
            .map(|i| {
                let start = 2.0 + i as f64 * 0.125;
                Note::new(72, 100, start, start + 0.125)
            })
            .collect();
        let steady: Vec<Note> = (0..8)
            .map(|i| {
                let start = i as f64 * 0.5;
                Note::new(48, 64, start, start + 0.5)
            })
            .collect();
        Piece::new(vec![Track::from_notes(loud), Track::from_notes(steady)])
    }

    fn placeholder_rows(piece: &Piece) -> Vec<FeatureVector> {
        // Any valid piece works; the fixed-score stub ignores the values
        let template = extract_features(&two_halves_piece(), &FeatureConfig::default()).unwrap()[0];
        vec![template; piece.track_count()]
    }

    fn config(chunk_sec: f64, melody_threshold: f64) -> SegmentConfig {
        SegmentConfig {
            chunk_sec,
            melody_threshold,
            ..SegmentConfig::default()
        }
    }

    #[test]
    fn test_loud_second_half_selects_last_chunks() {
        let piece = two_halves_piece();
        let features = extract_features(&piece, &FeatureConfig::default()).unwrap();
        let selection = segment_piece(&piece, &features, &DensityStub, &config(1.0, 0.2)).unwrap();

        assert_eq!(selection.track, 0);
        assert_eq!(selection.chunks.chunk_count, 4);
        assert_eq!(selection.chunk_ids(), &[2, 3]);
        assert!((selection.chunks.baseline_energy - 100.0).abs() < 1e-9);
        assert!((selection.chunks.min_energy - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_sustained_melody_sounds_until_pedal_release() {
        // One short note held by the pedal from 0s to 3s; the piece ends at the release
        let data = build_smf(
            &[
                TrackSpec::new("Lead", 0, 0, vec![(72, 80, 0, secs(0.5))])
                    .with_control(0, 64, 127)
                    .with_control(secs(3.0), 64, 0),
                TrackSpec::new("Bass", 1, 33, vec![(36, 80, 0, secs(1.0))]),
            ],
            None,
        );
        let piece = parse_piece(&data).unwrap();
        assert!((piece.duration() - 3.0).abs() < 1e-9);

        let features = extract_features(&piece, &FeatureConfig::default()).unwrap();
        assert!((features[0].own.duration_density - 1.0).abs() < 1e-9);

        let selection = segment_piece(&piece, &features, &FixedScores(vec![0.9, 0.1]), &config(1.0, 0.2)).unwrap();
        assert_eq!(selection.track, 0);
        assert_eq!(selection.chunks.chunk_count, 3);
        assert_eq!(selection.chunk_ids(), &[0, 1, 2]);
    }

    #[test]
    fn test_silent_selected_track_is_degenerate() {
        let piece = Piece::new(vec![
            Track::from_notes(vec![Note::new(60, 80, 0.0, 4.0)]),
            Track::new("Kit", 0, true, vec![Note::new(36, 120, 0.0, 4.0)]),
        ]);
        let rows = placeholder_rows(&piece);
        let err = segment_piece(&piece, &rows, &FixedScores(vec![0.1, 0.9]), &config(1.0, 0.2)).unwrap_err();
        assert!(matches!(err, SegmentError::DegenerateSignal { track: 1 }));
        assert_eq!(err.class(), ErrorClass::DegenerateSignal);
    }

    #[test]
    fn test_ties_pick_first_track() {
        assert_eq!(select_melody_track(&[0.2, 0.7, 0.7, 0.1]), Some(1));
        assert_eq!(select_melody_track(&[0.5, 0.5]), Some(0));
        assert_eq!(select_melody_track(&[]), None);

        let piece = two_halves_piece();
        let rows = placeholder_rows(&piece);
        let selection = segment_piece(&piece, &rows, &FixedScores(vec![0.6, 0.6]), &config(1.0, 0.2)).unwrap();
        assert_eq!(selection.track, 0);
    }

    #[test]
    fn test_no_positive_frames_has_no_baseline() {
        assert_eq!(select_chunks(&[0.0; 500], 100, 0.2), None);
        assert_eq!(select_chunks(&[], 100, 0.2), None);
    }

    #[test]
    fn test_silence_does_not_dilute_baseline() {
        let mut curve = vec![0.0; 300];
        curve.extend(vec![50.0; 100]);
        let sel = select_chunks(&curve, 100, 0.2).unwrap();
        assert_eq!(sel.baseline_energy, 50.0);
        assert_eq!(sel.chunk_ids, vec![3]);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Chunk 0 mean exactly equals the threshold (0.5 * 100), chunk 1 is above
        let mut curve = vec![100.0; 50];
        curve.extend(vec![0.0; 50]);
        curve.extend(vec![100.0; 100]);
        let sel = select_chunks(&curve, 100, 0.5).unwrap();
        assert_eq!(sel.min_energy, 50.0);
        assert_eq!(sel.chunk_ids, vec![1]);
    }

    #[test]
    fn test_trailing_partial_chunk_is_dropped() {
        let mut curve = vec![0.0; 1000];
        curve[0] = 10.0;
        curve.extend(vec![100.0; 50]);
        let sel = select_chunks(&curve, 100, 0.2).unwrap();
        assert_eq!(sel.chunk_count, 10);
        assert!(sel.chunk_ids.iter().all(|&i| i <= 9));
    }

    #[test]
    fn test_ids_ascending_unique_and_bounded() {
        let curve: Vec<f64> = (0..1234).map(|i| ((i * 37) % 11) as f64 * (i % 3) as f64).collect();
        let sel = select_chunks(&curve, 100, 0.3).unwrap();
        assert!(sel.chunk_ids.windows(2).all(|w| w[0] < w[1]));
        assert!(sel.chunk_ids.iter().all(|&i| i < curve.len() / 100));
    }

    #[test]
    fn test_raising_threshold_never_adds_chunks() {
        let curve: Vec<f64> = (0..2000)
            .map(|i| if (i / 100) % 3 == 0 { 0.0 } else { ((i % 97) as f64) * ((i / 100) as f64) })
            .collect();
        let mut previous: Option<Vec<usize>> = None;
        for step in 0..=40 {
            let threshold = step as f64 * 0.05;
            let ids = select_chunks(&curve, 100, threshold).unwrap().chunk_ids;
            if let Some(prev) = &previous {
                assert!(ids.iter().all(|i| prev.contains(i)), "threshold {}", threshold);
            }
            previous = Some(ids);
        }
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(SegmentConfig::default().validate().unwrap(), 1000);
        assert_eq!(config(0.5, 0.2).chunk_len().unwrap(), 50);
        assert!(matches!(config(0.001, 0.2).validate(), Err(SegmentError::InvalidConfig(_))));
        assert!(matches!(config(1.0, -0.1).validate(), Err(SegmentError::InvalidConfig(_))));
        assert!(matches!(config(1.0, f64::NAN).validate(), Err(SegmentError::InvalidConfig(_))));

        let negative = SegmentConfig {
            chunk_sec: -10.0,
            energy_fs: -100.0,
            ..SegmentConfig::default()
        };
        assert!(matches!(negative.validate(), Err(SegmentError::InvalidConfig(_))));
        let no_rate = SegmentConfig {
            energy_fs: 0.0,
            ..SegmentConfig::default()
        };
        assert!(matches!(no_rate.chunk_len(), Err(SegmentError::InvalidConfig(_))));
    }

    #[test]
    fn test_row_count_must_match_tracks() {
        let piece = two_halves_piece();
        let rows = placeholder_rows(&piece);
        let err = segment_piece(&piece, &rows[..1], &DensityStub, &config(1.0, 0.2)).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidStructure(_)));
    }

    #[test]
    fn test_out_of_range_probability() {
        let piece = two_halves_piece();
        let rows = placeholder_rows(&piece);
        let err = segment_piece(&piece, &rows, &FixedScores(vec![0.3, 1.5]), &config(1.0, 0.2)).unwrap_err();
        assert!(matches!(err, SegmentError::BadProbability { track: 1, .. }));

        let err = segment_piece(&piece, &rows, &FixedScores(vec![f64::NAN, 0.5]), &config(1.0, 0.2)).unwrap_err();
        assert!(matches!(err, SegmentError::BadProbability { track: 0, .. }));
    }
}
