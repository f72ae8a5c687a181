use std::fmt;

/// Coarse General MIDI instrument family.
///
/// Synth spans leads, pads and synth effects (programs 80-103); "others"
/// collects the sound effects tail of the program table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentFamily {
    Piano,
    ChromaticPercussion,
    Organ,
    Guitar,
    Bass,
    Strings,
    Ensemble,
    Brass,
    Reed,
    Pipe,
    Synth,
    Ethnic,
    Others,
    Drums,
}

impl InstrumentFamily {
    /// Map a 0-based General MIDI program number to its family.
    pub fn from_program(program: u8) -> Self {
        match program {
            0..=7 => Self::Piano,
            8..=15 => Self::ChromaticPercussion,
            16..=23 => Self::Organ,
            24..=31 => Self::Guitar,
            32..=39 => Self::Bass,
            40..=47 => Self::Strings,
            48..=55 => Self::Ensemble,
            56..=63 => Self::Brass,
            64..=71 => Self::Reed,
            72..=79 => Self::Pipe,
            80..=103 => Self::Synth,
            104..=110 => Self::Ethnic,
            _ => Self::Others,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Piano => "piano",
            Self::ChromaticPercussion => "chromatic_percussion",
            Self::Organ => "organ",
            Self::Guitar => "guitar",
            Self::Bass => "bass",
            Self::Strings => "strings",
            Self::Ensemble => "ensemble",
            Self::Brass => "brass",
            Self::Reed => "reed",
            Self::Pipe => "pipe",
            Self::Synth => "synth",
            Self::Ethnic => "ethnic",
            Self::Others => "others",
            Self::Drums => "drums",
        }
    }
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
