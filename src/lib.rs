pub mod classifier;
pub mod config;
pub mod dataset;
pub mod features;
pub mod midi;
pub mod segment;

use std::fmt;

/// Application name for XDG paths
pub const APP_NAME: &str = "melody-chunks";

/// Combined multi-track MIDI file expected inside every piece directory.
pub const DEFAULT_MIDI_FILENAME: &str = "all_src.mid";

/// Piece directories are recognised by this pattern in their name.
pub const DEFAULT_PIECE_PATTERN: &str = "Track";

/// Coarse failure classes shared by every error type in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Unreadable or malformed input: MIDI file, model artifact, dataset root, settings.
    Input,
    /// The piece cannot be analysed as a multi-track arrangement.
    InvalidStructure,
    /// A statistic or threshold would be undefined (empty sample, silent curve).
    DegenerateSignal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::InvalidStructure => "invalid structure",
            Self::DegenerateSignal => "degenerate signal",
        })
    }
}
