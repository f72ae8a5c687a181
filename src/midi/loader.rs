use super::{ControlChange, DRUM_CHANNEL, Note, Piece, Track};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Default tempo when a file carries no Set Tempo event (120 BPM).
const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed MIDI: {0}")]
    Malformed(String),
}

/// Read and parse a Standard MIDI File into a [`Piece`].
pub fn load_piece(path: &Path) -> Result<Piece, LoadError> {
    let data = std::fs::read(path)?;
    parse_piece(&data)
}

/// Parse SMF bytes into a [`Piece`].
///
/// Instruments are split by (SMF track, channel, program at note-off) and
/// ordered by the first note each one completes. A note-off closes every
/// open note of its channel and pitch that started on an earlier tick.
/// Zero-length notes and notes still open at end of track are dropped.
/// Tempo is read from the first SMF track only.
pub fn parse_piece(data: &[u8]) -> Result<Piece, LoadError> {
    let smf = Smf::parse(data).map_err(|e| LoadError::Malformed(e.to_string()))?;
    let clock = Clock::from_smf(&smf);

    let mut instruments = Instruments::default();
    let mut track_names: Vec<String> = Vec::with_capacity(smf.tracks.len());
    let mut meta_end = 0.0f64;

    for (track_idx, events) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        let mut track_name = String::new();
        let mut programs = [0u8; 16];
        // (channel, pitch) -> open notes as (start_tick, velocity)
        let mut open: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
        let mut dropped = 0usize;

        for event in events {
            tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    track_name = String::from_utf8_lossy(name).trim().to_string();
                }
                TrackEventKind::Meta(
                    MetaMessage::TimeSignature(..)
                    | MetaMessage::KeySignature(..)
                    | MetaMessage::Lyric(_)
                    | MetaMessage::Text(_),
                ) => {
                    meta_end = meta_end.max(clock.seconds_at(tick));
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    let key = (track_idx, ch, programs[ch as usize]);
                    match message {
                        MidiMessage::ProgramChange { program } => {
                            programs[ch as usize] = program.as_int();
                        }
                        MidiMessage::NoteOn { key: pitch, vel } if vel.as_int() > 0 => {
                            open.entry((ch, pitch.as_int())).or_default().push((tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key: pitch, .. } | MidiMessage::NoteOff { key: pitch, .. } => {
                            let pitch = pitch.as_int();
                            let Some(pending) = open.remove(&(ch, pitch)) else {
                                continue;
                            };
                            let (closing, starting): (Vec<_>, Vec<_>) =
                                pending.into_iter().partition(|&(start, _)| start != tick);
                            if closing.is_empty() {
                                dropped += starting.len();
                                continue;
                            }
                            if !starting.is_empty() {
                                open.insert((ch, pitch), starting);
                            }

                            let slot = instruments.for_note(key);
                            let end = clock.seconds_at(tick);
                            for (start, velocity) in closing {
                                instruments.tracks[slot].notes.push(Note::new(
                                    pitch,
                                    velocity,
                                    clock.seconds_at(start),
                                    end,
                                ));
                            }
                        }
                        MidiMessage::Controller { controller, value } => {
                            let lane = instruments.lane_for_control(key);
                            instruments.lanes[lane].controls.push(ControlChange::new(
                                controller.as_int(),
                                value.as_int(),
                                clock.seconds_at(tick),
                            ));
                        }
                        MidiMessage::PitchBend { .. } => {
                            let lane = instruments.lane_for_control(key);
                            let lane = &mut instruments.lanes[lane];
                            lane.last_bend = lane.last_bend.max(clock.seconds_at(tick));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        dropped += open.values().map(Vec::len).sum::<usize>();
        if dropped > 0 {
            log::debug!("Dropped {} unterminated or zero-length notes in SMF track {}", dropped, track_idx);
        }
        track_names.push(track_name);
    }

    let Instruments { tracks, lanes, .. } = instruments;
    let tracks = tracks
        .into_iter()
        .map(|b| {
            let lane = &lanes[b.lane];
            Track::new(track_names[b.smf_track].clone(), b.program, b.is_drum, b.notes)
                .with_controls(lane.controls.clone())
                .extend_end(lane.last_bend)
        })
        .collect();
    Ok(Piece::new(tracks).extend_end(meta_end))
}

struct TrackBuilder {
    smf_track: usize,
    program: u8,
    is_drum: bool,
    notes: Vec<Note>,
    lane: usize,
}

/// Control changes and pitch bends of one or more instruments.
#[derive(Default)]
struct ControlLane {
    controls: Vec<ControlChange>,
    last_bend: f64,
}

/// Instruments keyed by (SMF track, channel, program).
///
/// Control events that arrive before any note of the current program land
/// in a per-(track, channel) straggler lane. Instruments created later on
/// that channel share the straggler lane instead of getting their own.
#[derive(Default)]
struct Instruments {
    tracks: Vec<TrackBuilder>,
    by_key: HashMap<(usize, u8, u8), usize>,
    lanes: Vec<ControlLane>,
    stragglers: HashMap<(usize, u8), usize>,
}

impl Instruments {
    fn for_note(&mut self, key: (usize, u8, u8)) -> usize {
        if let Some(&slot) = self.by_key.get(&key) {
            return slot;
        }
        let (smf_track, channel, program) = key;
        let lane = match self.stragglers.get(&(smf_track, channel)) {
            Some(&lane) => lane,
            None => self.new_lane(),
        };
        self.tracks.push(TrackBuilder {
            smf_track,
            program,
            is_drum: channel == DRUM_CHANNEL,
            notes: Vec::new(),
            lane,
        });
        let slot = self.tracks.len() - 1;
        self.by_key.insert(key, slot);
        slot
    }

    fn lane_for_control(&mut self, key: (usize, u8, u8)) -> usize {
        if let Some(&slot) = self.by_key.get(&key) {
            return self.tracks[slot].lane;
        }
        let (smf_track, channel, _) = key;
        if let Some(&lane) = self.stragglers.get(&(smf_track, channel)) {
            return lane;
        }
        let lane = self.new_lane();
        self.stragglers.insert((smf_track, channel), lane);
        lane
    }

    fn new_lane(&mut self) -> usize {
        self.lanes.push(ControlLane::default());
        self.lanes.len() - 1
    }
}

/// Tick-to-seconds conversion for either timing mode of an SMF.
enum Clock {
    Metrical {
        ticks_per_beat: f64,
        /// Tempo segments: (start tick, seconds at start tick, µs per beat).
        segments: Vec<(u64, f64, f64)>,
    },
    Timecode { ticks_per_second: f64 },
}

impl Clock {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(tpb) => {
                // Tempo map lives in the first track of format 0/1 files
                let mut changes: Vec<(u64, u32)> = Vec::new();
                let mut tick: u64 = 0;
                for event in smf.tracks.first().into_iter().flatten() {
                    tick += event.delta.as_int() as u64;
                    if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = event.kind {
                        changes.push((tick, t.as_int()));
                    }
                }
                Self::metrical(tpb.as_int().max(1) as f64, changes)
            }
            Timing::Timecode(fps, subframes) => {
                let frames_per_sec = match fps {
                    midly::Fps::Fps24 => 24.0,
                    midly::Fps::Fps25 => 25.0,
                    midly::Fps::Fps29 => 29.97,
                    midly::Fps::Fps30 => 30.0,
                };
                Self::Timecode {
                    ticks_per_second: frames_per_sec * (subframes.max(1) as f64),
                }
            }
        }
    }

    fn metrical(ticks_per_beat: f64, mut changes: Vec<(u64, u32)>) -> Self {
        changes.sort_by_key(|&(tick, _)| tick);

        let mut segments = vec![(0u64, 0.0f64, DEFAULT_USEC_PER_BEAT as f64)];
        for (tick, usec) in changes {
            let Some(&(last_tick, last_secs, last_usec)) = segments.last() else {
                continue;
            };
            if tick == last_tick {
                // Later event at the same tick wins
                if let Some(last) = segments.last_mut() {
                    last.2 = usec as f64;
                }
                continue;
            }
            let secs = last_secs + span_secs(tick - last_tick, last_usec, ticks_per_beat);
            segments.push((tick, secs, usec as f64));
        }

        Self::Metrical { ticks_per_beat, segments }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            Self::Metrical { ticks_per_beat, segments } => {
                let pos = segments.partition_point(|&(t, _, _)| t <= tick);
                let (start, secs, usec) = segments[pos.saturating_sub(1)];
                secs + span_secs(tick - start, usec, *ticks_per_beat)
            }
            Self::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }
}

/// Duration of `ticks` at a constant tempo, as one division of exact products.
fn span_secs(ticks: u64, usec_per_beat: f64, ticks_per_beat: f64) -> f64 {
    ticks as f64 * usec_per_beat / (ticks_per_beat * 1_000_000.0)
}
