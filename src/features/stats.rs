use crate::midi::{Note, PianoRoll};

/// Population mean and standard deviation. `None` for an empty slice.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    Some((mean, variance.sqrt()))
}

/// Inter-onset intervals of onset-ordered `notes`.
///
/// Onsets closer than `eps` to the onset immediately before them are merged
/// into one attack; each gap runs from the first onset of an attack to the
/// first onset of the next one. Tracks with 0 or 1 notes yield `[0.0]`. A
/// track whose onsets all merge into a single attack yields an empty vector.
pub fn ioi_sequence(notes: &[Note], eps: f64) -> Vec<f64> {
    let total = notes.len();
    if total <= 1 {
        return vec![0.0];
    }

    let mut iois = Vec::new();
    let mut i = 0;
    while i < total {
        let mut j = i + 1;
        while j < total && notes[j].start - notes[j - 1].start < eps {
            j += 1;
        }
        if j < total {
            iois.push(notes[j].start - notes[i].start);
        }
        i = j;
    }
    iois
}

/// Activity summary of a binarised piano roll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activity {
    /// Mean number of simultaneous pitches over sounding frames (0 if silent).
    pub polyphony_rate: f64,
    /// Seconds during which at least one pitch sounds.
    pub activated_secs: f64,
}

impl Activity {
    pub fn from_roll(roll: &PianoRoll) -> Self {
        let sounding: Vec<u32> = roll
            .active_pitch_counts()
            .into_iter()
            .filter(|&c| c > 0)
            .collect();

        let polyphony_rate = if sounding.is_empty() {
            0.0
        } else {
            sounding.iter().map(|&c| c as f64).sum::<f64>() / sounding.len() as f64
        };

        Self {
            polyphony_rate,
            activated_secs: sounding.len() as f64 / roll.fs(),
        }
    }
}
