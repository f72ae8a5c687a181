use super::{SUSTAIN_PEDAL, Track};

/// Number of MIDI pitches (rows of a piano roll).
pub const NUM_PITCHES: usize = 128;

/// Sustain pedal values at or above this count as pressed.
pub const PEDAL_THRESHOLD: u8 = 64;

/// Velocity piano roll of one track: 128 pitches x `frames` time steps,
/// stored frame-major so per-frame reductions are contiguous.
#[derive(Debug, Clone)]
pub struct PianoRoll {
    fs: f64,
    frames: usize,
    cells: Vec<f64>,
}

impl PianoRoll {
    /// Render `track` at `fs` frames per second.
    ///
    /// The roll spans `floor(fs * track.end_time())` frames, or none when the
    /// track has no notes. Every note adds its velocity to frames
    /// `[floor(start * fs), floor(end * fs))` of its pitch row. Drum tracks
    /// have no pitch and render as all zeros.
    ///
    /// While the sustain pedal is down each pitch holds the loudest value it
    /// has reached since the pedal went down. A pedal still down at the end
    /// of the track holds nothing.
    pub fn render(track: &Track, fs: f64) -> Self {
        let frames = if track.notes().is_empty() {
            0
        } else {
            frame_index(track.end_time(), fs)
        };
        let mut roll = Self {
            fs,
            frames,
            cells: vec![0.0; frames * NUM_PITCHES],
        };
        if track.is_drum {
            return roll;
        }

        for note in track.notes() {
            let pitch = note.pitch as usize;
            if pitch >= NUM_PITCHES {
                continue;
            }
            let start = frame_index(note.start, fs);
            let end = frame_index(note.end, fs).min(frames);
            for frame in start..end {
                roll.cells[frame * NUM_PITCHES + pitch] += note.velocity as f64;
            }
        }

        let mut pedal_down: Option<usize> = None;
        for cc in track.controls().iter().filter(|c| c.number == SUSTAIN_PEDAL) {
            let now = frame_index(cc.time, fs);
            match (pedal_down, cc.value >= PEDAL_THRESHOLD) {
                (None, true) => pedal_down = Some(now),
                (Some(from), false) => {
                    roll.hold_running_max(from, now);
                    pedal_down = None;
                }
                _ => {}
            }
        }

        roll
    }

    /// Replace frames `[from, to)` of every pitch with their running maximum.
    fn hold_running_max(&mut self, from: usize, to: usize) {
        let to = to.min(self.frames);
        if from >= to {
            return;
        }
        for frame in from + 1..to {
            for pitch in 0..NUM_PITCHES {
                let held = self.cells[(frame - 1) * NUM_PITCHES + pitch];
                let cell = &mut self.cells[frame * NUM_PITCHES + pitch];
                if held > *cell {
                    *cell = held;
                }
            }
        }
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn get(&self, pitch: usize, frame: usize) -> f64 {
        self.cells[frame * NUM_PITCHES + pitch]
    }

    fn frame(&self, frame: usize) -> &[f64] {
        &self.cells[frame * NUM_PITCHES..(frame + 1) * NUM_PITCHES]
    }

    /// Sum over pitches for every frame (velocity-weighted activity).
    pub fn energy_curve(&self) -> Vec<f64> {
        (0..self.frames).map(|f| self.frame(f).iter().sum()).collect()
    }

    /// Number of sounding pitches in every frame.
    pub fn active_pitch_counts(&self) -> Vec<u32> {
        (0..self.frames)
            .map(|f| self.frame(f).iter().filter(|&&v| v > 0.0).count() as u32)
            .collect()
    }
}

/// Truncating seconds-to-frame conversion; negative times clamp to frame 0.
fn frame_index(seconds: f64, fs: f64) -> usize {
    let idx = seconds * fs;
    if idx.is_finite() && idx > 0.0 { idx as usize } else { 0 }
}
