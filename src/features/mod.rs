pub mod stats;

use crate::ErrorClass;
use crate::midi::{Piece, Track};
use serde::Deserialize;
use stats::{Activity, ioi_sequence, mean_std};
use thiserror::Error;

/// Number of values in a track's feature vector.
pub const FEATURE_DIM: usize = 18;

/// Column names of a feature vector, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "polyphony_rate",
    "note_density",
    "duration_density",
    "pitch_mean",
    "pitch_std",
    "velocity_mean",
    "velocity_std",
    "ioi_mean",
    "ioi_std",
    "others_polyphony_rate",
    "others_note_density",
    "others_duration_density",
    "others_pitch_mean",
    "others_pitch_std",
    "others_velocity_mean",
    "others_velocity_std",
    "others_ioi_mean",
    "others_ioi_std",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Invalid feature settings: {0}")]
    InvalidConfig(String),
    #[error("piece has {0} track(s), at least 2 are required")]
    TooFewTracks(usize),
    #[error("piece has zero duration")]
    ZeroDuration,
    #[error("track {track}: {statistic} requires at least one note")]
    EmptyTrack { track: usize, statistic: &'static str },
    #[error("track {track}: {statistic} is undefined ({reason})")]
    DegenerateSignal {
        track: usize,
        statistic: &'static str,
        reason: &'static str,
    },
}

impl FeatureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidConfig(_) => ErrorClass::Input,
            Self::TooFewTracks(_) | Self::ZeroDuration | Self::EmptyTrack { .. } => {
                ErrorClass::InvalidStructure
            }
            Self::DegenerateSignal { .. } => ErrorClass::DegenerateSignal,
        }
    }
}

/// Sampling and merge settings for feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Piano roll rate (Hz) for polyphony and duration density.
    pub polyphony_fs: f64,
    /// Onsets closer than this (seconds) merge into one attack.
    pub ioi_eps: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            polyphony_fs: 20.0,
            ioi_eps: 0.075,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), FeatureError> {
        if !self.polyphony_fs.is_finite() || self.polyphony_fs <= 0.0 {
            return Err(FeatureError::InvalidConfig(format!(
                "polyphony_fs must be a positive rate, got {}",
                self.polyphony_fs
            )));
        }
        if !self.ioi_eps.is_finite() || self.ioi_eps < 0.0 {
            return Err(FeatureError::InvalidConfig(format!(
                "ioi_eps must be a finite non-negative duration, got {}",
                self.ioi_eps
            )));
        }
        Ok(())
    }
}

/// Nine descriptors of a note population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descriptors {
    pub polyphony_rate: f64,
    pub note_density: f64,
    pub duration_density: f64,
    pub pitch_mean: f64,
    pub pitch_std: f64,
    pub velocity_mean: f64,
    pub velocity_std: f64,
    pub ioi_mean: f64,
    pub ioi_std: f64,
}

impl Descriptors {
    fn values(&self) -> [f64; 9] {
        [
            self.polyphony_rate,
            self.note_density,
            self.duration_density,
            self.pitch_mean,
            self.pitch_std,
            self.velocity_mean,
            self.velocity_std,
            self.ioi_mean,
            self.ioi_std,
        ]
    }
}

/// A track's own descriptors followed by the aggregate of every other track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub own: Descriptors,
    pub others: Descriptors,
}

impl FeatureVector {
    /// Flatten into the 18-value layout named by [`FEATURE_NAMES`].
    pub fn to_array(&self) -> [f64; FEATURE_DIM] {
        let mut out = [0.0; FEATURE_DIM];
        out[..9].copy_from_slice(&self.own.values());
        out[9..].copy_from_slice(&self.others.values());
        out
    }
}

/// Per-track raw material shared by the "own" and "others" statistics.
struct TrackProfile {
    activity: Activity,
    note_density: f64,
    duration_density: f64,
    pitches: Vec<f64>,
    velocities: Vec<f64>,
    iois: Vec<f64>,
}

impl TrackProfile {
    fn compute(track: &Track, duration: f64, config: &FeatureConfig) -> Self {
        let activity = Activity::from_roll(&track.piano_roll(config.polyphony_fs));
        Self {
            activity,
            note_density: track.note_count() as f64 / duration,
            duration_density: activity.activated_secs / duration,
            pitches: track.notes().iter().map(|n| n.pitch as f64).collect(),
            velocities: track.notes().iter().map(|n| n.velocity as f64).collect(),
            iois: ioi_sequence(track.notes(), config.ioi_eps),
        }
    }
}

/// Compute one feature vector per track, in the piece's track order.
///
/// Row `i` depends only on track `i` and the set of the other tracks. Any
/// undefined statistic fails the whole piece.
pub fn extract_features(piece: &Piece, config: &FeatureConfig) -> Result<Vec<FeatureVector>, FeatureError> {
    config.validate()?;
    let n = piece.track_count();
    if n < 2 {
        return Err(FeatureError::TooFewTracks(n));
    }
    let duration = piece.duration();
    if !(duration > 0.0) {
        return Err(FeatureError::ZeroDuration);
    }

    let profiles: Vec<TrackProfile> = piece
        .tracks()
        .iter()
        .map(|t| TrackProfile::compute(t, duration, config))
        .collect();

    // Per-track statistics first, so a structurally broken track is
    // reported as such rather than through another row's aggregate
    let own: Vec<Descriptors> = profiles
        .iter()
        .enumerate()
        .map(|(i, p)| own_descriptors(i, p))
        .collect::<Result<_, _>>()?;

    own.into_iter()
        .enumerate()
        .map(|(i, own)| {
            let others = others_descriptors(i, &profiles)?;
            Ok(FeatureVector { own, others })
        })
        .collect()
}

fn own_descriptors(track: usize, p: &TrackProfile) -> Result<Descriptors, FeatureError> {
    let (pitch_mean, pitch_std) = mean_std(&p.pitches).ok_or(FeatureError::EmptyTrack {
        track,
        statistic: "pitch mean/std",
    })?;
    let (velocity_mean, velocity_std) = mean_std(&p.velocities).ok_or(FeatureError::EmptyTrack {
        track,
        statistic: "velocity mean/std",
    })?;
    let (ioi_mean, ioi_std) = mean_std(&p.iois).ok_or(FeatureError::DegenerateSignal {
        track,
        statistic: "ioi mean/std",
        reason: "all onsets merge into a single attack",
    })?;

    Ok(Descriptors {
        polyphony_rate: p.activity.polyphony_rate,
        note_density: p.note_density,
        duration_density: p.duration_density,
        pitch_mean,
        pitch_std,
        velocity_mean,
        velocity_std,
        ioi_mean,
        ioi_std,
    })
}

fn others_descriptors(track: usize, profiles: &[TrackProfile]) -> Result<Descriptors, FeatureError> {
    let others: Vec<&TrackProfile> = profiles
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != track)
        .map(|(_, p)| p)
        .collect();
    let count = others.len() as f64;

    // Note density weighted by how long each other track actually sounds
    let active_total: f64 = others.iter().map(|p| p.activity.activated_secs).sum();
    if !(active_total > 0.0) {
        return Err(FeatureError::DegenerateSignal {
            track,
            statistic: "others polyphony rate",
            reason: "no other track ever sounds",
        });
    }
    let weighted: f64 = others
        .iter()
        .map(|p| p.note_density * p.activity.activated_secs)
        .sum();

    let pitches: Vec<f64> = others.iter().flat_map(|p| p.pitches.iter().copied()).collect();
    let velocities: Vec<f64> = others.iter().flat_map(|p| p.velocities.iter().copied()).collect();
    let iois: Vec<f64> = others.iter().flat_map(|p| p.iois.iter().copied()).collect();

    // Every other track already passed own_descriptors, so no pool is empty
    let pooled = |statistic: &'static str, values: &[f64]| {
        mean_std(values).ok_or(FeatureError::DegenerateSignal {
            track,
            statistic,
            reason: "other tracks have no notes",
        })
    };
    let (pitch_mean, pitch_std) = pooled("others pitch mean/std", &pitches)?;
    let (velocity_mean, velocity_std) = pooled("others velocity mean/std", &velocities)?;
    let (ioi_mean, ioi_std) = pooled("others ioi mean/std", &iois)?;

    Ok(Descriptors {
        polyphony_rate: weighted / active_total,
        note_density: others.iter().map(|p| p.note_density).sum::<f64>() / count,
        duration_density: others.iter().map(|p| p.duration_density).sum::<f64>() / count,
        pitch_mean,
        pitch_std,
        velocity_mean,
        velocity_std,
        ioi_mean,
        ioi_std,
    })
}
