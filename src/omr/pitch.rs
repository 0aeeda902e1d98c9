//! Pitch mapping: staff position → letter and MIDI root through the
//! clef tables, adjusted by the key signature and the per-measure
//! accidental state, plus SATB voice assignment by stem direction.

use std::collections::HashMap;

use crate::score::{
    Accidental, Barline, Clef, KeyKind, KeySignature, Note, Staff, Voice,
};

use super::HeadCandidate;

/// Letter cycle and semitone offsets within an octave.
const LETTERS: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];
const SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Sharp/flat application order.
const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];
const FLAT_ORDER: [char; 7] = ['B', 'E', 'A', 'D', 'G', 'C', 'F'];

/// Diatonic anchor of staff position 0 (the bottom line) per clef,
/// counted as `octave × 7 + letter index` with C0 = 0.
fn anchor(clef: Clef) -> i32 {
    match clef {
        Clef::Treble => 4 * 7 + 2,  // E4
        Clef::Bass => 2 * 7 + 4,    // G2
        Clef::Alto => 3 * 7 + 3,    // F3
        Clef::Tenor => 3 * 7 + 1,   // D3
        Clef::Soprano => 4 * 7 + 0, // C4
    }
}

/// `(letter, natural midi)` of a staff position under a clef. Works
/// for any position; octaves extrapolate naturally.
pub fn pitch_at(clef: Clef, position: i32) -> (char, i32) {
    let diatonic = anchor(clef) + position;
    let letter_idx = diatonic.rem_euclid(7) as usize;
    let octave = diatonic.div_euclid(7);
    (LETTERS[letter_idx], 12 * (octave + 1) + SEMITONES[letter_idx])
}

/// Key-signature alteration for a letter: +1, −1, or 0.
fn key_alteration(key: &KeySignature, letter: char) -> i32 {
    let count = key.count.min(7) as usize;
    match key.kind {
        KeyKind::Sharps if SHARP_ORDER[..count].contains(&letter) => 1,
        KeyKind::Flats if FLAT_ORDER[..count].contains(&letter) => -1,
        _ => 0,
    }
}

fn accidental_alteration(accidental: Accidental) -> i32 {
    match accidental {
        Accidental::Sharp => 1,
        Accidental::Flat => -1,
        Accidental::Natural => 0,
    }
}

/// Turn the rhythm-annotated candidates into pitched notes.
///
/// An inline accidental writes the per-(measure, position) state for
/// its staff; the state overrides the key signature for the rest of
/// the measure and dies at the next barline.
pub fn map_pitches(
    staves: &[Staff],
    clefs: &[Clef],
    key: &KeySignature,
    barlines: &[Barline],
    heads: &[HeadCandidate],
) -> Vec<Note> {
    let mut notes = Vec::with_capacity(heads.len());

    for staff_index in 0..staves.len() {
        let clef = clefs.get(staff_index).copied().unwrap_or(Clef::Treble);
        let mut bar_xs: Vec<u32> = barlines
            .iter()
            .filter(|b| b.staff_index == staff_index)
            .map(|b| b.x)
            .collect();
        bar_xs.sort_unstable();

        // (measure, staff position) → alteration override.
        let mut state: HashMap<(usize, i32), i32> = HashMap::new();

        for head in heads.iter().filter(|h| h.staff_index == staff_index) {
            let measure = bar_xs.partition_point(|&bx| bx <= head.x);
            let (letter, natural) = pitch_at(clef, head.position);

            if let Some(accidental) = head.accidental {
                state.insert((measure, head.position), accidental_alteration(accidental));
            }
            let alteration = state
                .get(&(measure, head.position))
                .copied()
                .unwrap_or_else(|| key_alteration(key, letter));

            let midi = (natural + alteration).clamp(21, 108) as u8;
            notes.push(Note {
                x: head.x,
                y: head.y,
                staff_index,
                staff_position: head.position,
                pitch_name: letter,
                midi_note: midi,
                duration: head.duration,
                dotted: head.dotted,
                tied_beats: None,
                stem_dir: head.stem_dir,
                voice: assign_voice(clef, head.stem_dir),
                clef,
                accidental: head.accidental,
                repeated: false,
            });
        }
    }
    notes
}

/// Stem direction picks the voice layer within the staff family.
fn assign_voice(clef: Clef, stem_dir: i8) -> Voice {
    if clef.is_treble_family() {
        match stem_dir {
            1 => Voice::Alto,
            _ => Voice::Soprano,
        }
    } else {
        match stem_dir {
            -1 => Voice::Tenor,
            _ => Voice::Bass,
        }
    }
}
