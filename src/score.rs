//! Data model for the symbolic score reconstructed from a sheet image.
//!
//! These structures are the contract between the recognition pipeline
//! and the audio renderer: timed events carrying image coordinates, plus
//! a metadata envelope describing the page geometry they came from.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Note/rest duration classes. Dots are carried separately and multiply
/// the base beat weight by 1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duration {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    #[serde(rename = "32nd")]
    ThirtySecond,
}

impl Duration {
    /// Base beat weight (quarter note = 1 beat).
    pub fn base_beats(self) -> f32 {
        match self {
            Duration::Whole => 4.0,
            Duration::Half => 2.0,
            Duration::Quarter => 1.0,
            Duration::Eighth => 0.5,
            Duration::Sixteenth => 0.25,
            Duration::ThirtySecond => 0.125,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Duration::Whole => "whole",
            Duration::Half => "half",
            Duration::Quarter => "quarter",
            Duration::Eighth => "eighth",
            Duration::Sixteenth => "sixteenth",
            Duration::ThirtySecond => "32nd",
        }
    }

    const ALL: [Duration; 6] = [
        Duration::Whole,
        Duration::Half,
        Duration::Quarter,
        Duration::Eighth,
        Duration::Sixteenth,
        Duration::ThirtySecond,
    ];

    /// Closest named duration (plain or dotted) to a beat count.
    /// Returns `(duration, dotted)`.
    pub fn closest(beats: f32) -> (Duration, bool) {
        let mut best = (Duration::Quarter, false);
        let mut best_err = f32::INFINITY;
        for dur in Duration::ALL {
            for dotted in [false, true] {
                let value = dur.base_beats() * if dotted { 1.5 } else { 1.0 };
                let err = (beats - value).abs();
                if err < best_err {
                    best_err = err;
                    best = (dur, dotted);
                }
            }
        }
        best
    }
}

/// Clef fixing the pitch of the staff's reference line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clef {
    Treble,
    Bass,
    Alto,
    Soprano,
    Tenor,
}

impl Clef {
    /// Treble-family staves split stems into Soprano/Alto; bass-family
    /// into Tenor/Bass.
    pub fn is_treble_family(self) -> bool {
        matches!(self, Clef::Treble | Clef::Alto | Clef::Soprano)
    }
}

/// Choral voice layer an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Soprano,
    Alto,
    Tenor,
    Bass,
}

/// Accidental glyph attached to a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accidental {
    Sharp,
    Flat,
    Natural,
}

/// Key signature kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    None,
    Sharps,
    Flats,
}

/// Global key signature: a kind plus how many accidentals it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub kind: KeyKind,
    pub count: u8,
}

impl KeySignature {
    pub fn none() -> Self {
        Self { kind: KeyKind::None, count: 0 }
    }
}

/// Time signature with the x past which the signature region ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u8,
    pub beat_type: u8,
    pub compound: bool,
    /// Right edge of the detected signature region in image pixels;
    /// later stages start scanning past it.
    pub end_x: u32,
}

impl TimeSignature {
    pub fn common_time(end_x: u32) -> Self {
        Self { beats: 4, beat_type: 4, compound: false, end_x }
    }

    /// Expected beat total of one measure, in quarter-note beats.
    pub fn beats_per_measure(&self) -> f32 {
        self.beats as f32 * (4.0 / self.beat_type as f32)
    }
}

/// Barline classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarlineKind {
    Single,
    Double,
    Final,
    RepeatStart,
    RepeatEnd,
    RepeatBoth,
}

/// A vertical barline on one staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barline {
    pub x: u32,
    pub staff_index: usize,
    pub kind: BarlineKind,
}

/// One staff: five ascending line y-coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub lines: [u32; 5],
}

impl Staff {
    pub fn top(&self) -> u32 {
        self.lines[0]
    }

    pub fn bottom(&self) -> u32 {
        self.lines[4]
    }

    /// Average distance between adjacent lines.
    pub fn spacing(&self) -> f32 {
        (self.lines[4] - self.lines[0]) as f32 / 4.0
    }

    pub fn half_space(&self) -> f32 {
        self.spacing() / 2.0
    }

    pub fn height(&self) -> u32 {
        self.lines[4] - self.lines[0]
    }

    /// Staff position of a y coordinate: 0 = bottom line, +1 per
    /// half-space upward. Not rounded.
    pub fn position_of(&self, y: f32) -> f32 {
        (self.lines[4] as f32 - y) / self.half_space()
    }

    /// y coordinate of an integer staff position.
    pub fn y_of_position(&self, position: i32) -> f32 {
        self.lines[4] as f32 - position as f32 * self.half_space()
    }
}

/// A horizontal row of staves played together (grand staff, SATB block,
/// or a lone staff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub top: u32,
    pub bottom: u32,
    pub staff_indices: Vec<usize>,
}

/// A pitched note event with its image anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    /// Half-space offset from the bottom staff line.
    pub staff_position: i32,
    /// Letter name A..G.
    pub pitch_name: char,
    pub midi_note: u8,
    pub duration: Duration,
    pub dotted: bool,
    /// Set when a tie chain was collapsed into this note: the summed
    /// beat value of all chain members.
    pub tied_beats: Option<f32>,
    /// -1 stem up, +1 stem down, 0 none detected.
    pub stem_dir: i8,
    pub voice: Voice,
    pub clef: Clef,
    pub accidental: Option<Accidental>,
    /// True for events inserted by repeat expansion.
    pub repeated: bool,
}

impl Note {
    /// Beat value used by the renderer; a collapsed tie chain overrides
    /// the notated duration.
    pub fn beats(&self) -> f32 {
        match self.tied_beats {
            Some(b) => b,
            None => self.duration.base_beats() * if self.dotted { 1.5 } else { 1.0 },
        }
    }

    /// Duration label in the `dotted_` naming scheme.
    pub fn duration_label(&self) -> String {
        if self.dotted {
            format!("dotted_{}", self.duration.name())
        } else {
            self.duration.name().to_string()
        }
    }
}

/// Rest duration classes (no 32nd rests are detected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestKind {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl RestKind {
    pub fn base_beats(self) -> f32 {
        match self {
            RestKind::Whole => 4.0,
            RestKind::Half => 2.0,
            RestKind::Quarter => 1.0,
            RestKind::Eighth => 0.5,
            RestKind::Sixteenth => 0.25,
        }
    }
}

/// A rest event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    pub kind: RestKind,
    pub dotted: bool,
    pub voice: Voice,
    pub repeated: bool,
}

impl Rest {
    pub fn beats(&self) -> f32 {
        self.kind.base_beats() * if self.dotted { 1.5 } else { 1.0 }
    }
}

/// A note or rest; the score is an ordered sequence of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScoreEvent {
    Note(Note),
    Rest(Rest),
}

impl ScoreEvent {
    pub fn x(&self) -> u32 {
        match self {
            ScoreEvent::Note(n) => n.x,
            ScoreEvent::Rest(r) => r.x,
        }
    }

    pub fn y(&self) -> u32 {
        match self {
            ScoreEvent::Note(n) => n.y,
            ScoreEvent::Rest(r) => r.y,
        }
    }

    pub fn staff_index(&self) -> usize {
        match self {
            ScoreEvent::Note(n) => n.staff_index,
            ScoreEvent::Rest(r) => r.staff_index,
        }
    }

    pub fn voice(&self) -> Voice {
        match self {
            ScoreEvent::Note(n) => n.voice,
            ScoreEvent::Rest(r) => r.voice,
        }
    }

    pub fn beats(&self) -> f32 {
        match self {
            ScoreEvent::Note(n) => n.beats(),
            ScoreEvent::Rest(r) => r.beats(),
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, ScoreEvent::Rest(_))
    }

    pub fn set_x(&mut self, x: u32) {
        match self {
            ScoreEvent::Note(n) => n.x = x,
            ScoreEvent::Rest(r) => r.x = x,
        }
    }

    pub fn set_repeated(&mut self, repeated: bool) {
        match self {
            ScoreEvent::Note(n) => n.repeated = repeated,
            ScoreEvent::Rest(r) => r.repeated = repeated,
        }
    }
}

/// One measure of one staff: the event indices it holds and its
/// horizontal extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub measure_index: usize,
    pub staff_index: usize,
    /// Indices into `Score::events`.
    pub events: Vec<usize>,
    pub left: u32,
    pub right: Option<u32>,
}

/// Envelope describing the page the events were read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub image_width: u32,
    pub image_height: u32,
    pub staves: Vec<Staff>,
    /// One clef per staff, same order as `staves`.
    pub clefs: Vec<Clef>,
    pub key_signature: KeySignature,
    pub time_signature: TimeSignature,
    pub barlines: Vec<Barline>,
    pub ledger_line_count: usize,
    pub systems: Vec<System>,
    pub total_notes: usize,
    pub total_rests: usize,
}

/// The complete recognized score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Ordered by `(staff_index, x)`, both non-decreasing.
    pub events: Vec<ScoreEvent>,
    pub measures: Vec<Measure>,
    pub metadata: ScoreMetadata,
    /// Set once repeat regions have been expanded into the event list;
    /// guards expansion against running twice.
    pub repeats_expanded: bool,
}

impl Score {
    pub fn staff_count(&self) -> usize {
        self.metadata.staves.len()
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.events.iter().filter_map(|e| match e {
            ScoreEvent::Note(n) => Some(n),
            ScoreEvent::Rest(_) => None,
        })
    }

    pub fn rests(&self) -> impl Iterator<Item = &Rest> {
        self.events.iter().filter_map(|e| match e {
            ScoreEvent::Rest(r) => Some(r),
            ScoreEvent::Note(_) => None,
        })
    }

    /// Restore the `(staff_index, x)` ordering after a pass that moved
    /// events around.
    pub fn sort_events(&mut self) {
        self.events
            .sort_by_key(|e| (e.staff_index(), e.x()));
    }

    /// Check the hard invariants of the event stream. Violations
    /// indicate a pipeline bug, not bad input.
    pub fn verify_invariants(&self) -> Result<(), ScanError> {
        for note in self.notes() {
            if !(21..=108).contains(&note.midi_note) {
                return Err(ScanError::InvariantViolated(format!(
                    "midi note {} out of [21,108] at x={}",
                    note.midi_note, note.x
                )));
            }
            if let Some(beats) = note.tied_beats {
                if beats <= 0.0 {
                    return Err(ScanError::InvariantViolated(format!(
                        "tie chain produced non-positive duration {beats} at x={}",
                        note.x
                    )));
                }
            }
        }
        for pair in self.events.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if (a.staff_index(), a.x()) > (b.staff_index(), b.x()) {
                return Err(ScanError::InvariantViolated(format!(
                    "events out of order: staff {} x {} before staff {} x {}",
                    a.staff_index(),
                    a.x(),
                    b.staff_index(),
                    b.x()
                )));
            }
        }
        Ok(())
    }
}
