pub mod instruments;
pub mod loader;
pub mod roll;

pub use instruments::InstrumentFamily;
pub use loader::{LoadError, load_piece};
pub use roll::PianoRoll;

/// MIDI channel index (0-based) reserved for percussion.
pub const DRUM_CHANNEL: u8 = 9;

/// Controller number of the damper (sustain) pedal.
pub const SUSTAIN_PEDAL: u8 = 64;

/// A single note event, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub end: f64,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: f64, end: f64) -> Self {
        Self { pitch, velocity, start, end }
    }
}

/// A control change message, time in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlChange {
    pub number: u8,
    pub value: u8,
    pub time: f64,
}

impl ControlChange {
    pub fn new(number: u8, value: u8, time: f64) -> Self {
        Self { number, value, time }
    }
}

/// One instrument line of a piece. Notes are kept in onset order.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub program: u8,
    pub is_drum: bool,
    notes: Vec<Note>,
    /// Control changes in file order.
    controls: Vec<ControlChange>,
    /// Latest non-note event (control change or pitch bend), seconds.
    last_event: f64,
}

impl Track {
    pub fn new(name: impl Into<String>, program: u8, is_drum: bool, mut notes: Vec<Note>) -> Self {
        // Stable sort keeps file order for simultaneous onsets
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            name: name.into(),
            program,
            is_drum,
            notes,
            controls: Vec::new(),
            last_event: 0.0,
        }
    }

    /// Attach control changes; they count towards the track's end time.
    pub fn with_controls(mut self, controls: Vec<ControlChange>) -> Self {
        self.last_event = controls.iter().map(|c| c.time).fold(self.last_event, f64::max);
        self.controls = controls;
        self
    }

    /// Extend the end time to cover an event that carries no note (pitch bend).
    pub fn extend_end(mut self, time: f64) -> Self {
        self.last_event = self.last_event.max(time);
        self
    }

    /// Convenience constructor for a pitched, unnamed track on program 0.
    pub fn from_notes(notes: Vec<Note>) -> Self {
        Self::new("", 0, false, notes)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    pub fn controls(&self) -> &[ControlChange] {
        &self.controls
    }

    /// End of the latest note, control change or pitch bend; 0 for an empty track.
    pub fn end_time(&self) -> f64 {
        self.notes.iter().map(|n| n.end).fold(self.last_event, f64::max)
    }

    pub fn family(&self) -> InstrumentFamily {
        if self.is_drum {
            InstrumentFamily::Drums
        } else {
            InstrumentFamily::from_program(self.program)
        }
    }

    /// Render this track's velocity piano roll at `fs` frames per second.
    pub fn piano_roll(&self, fs: f64) -> PianoRoll {
        PianoRoll::render(self, fs)
    }
}

/// A parsed multi-track piece. Immutable once built.
#[derive(Debug, Clone)]
pub struct Piece {
    tracks: Vec<Track>,
    duration: f64,
}

impl Piece {
    pub fn new(tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::end_time).fold(0.0, f64::max);
        Self { tracks, duration }
    }

    /// Extend the duration to cover a piece-level meta event
    /// (time or key signature, lyric, text).
    pub fn extend_end(mut self, time: f64) -> Self {
        self.duration = self.duration.max(time);
        self
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Total duration in seconds: time of the latest event across all tracks.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}
