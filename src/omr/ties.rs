//! Tie detection and collapse: same-pitch neighbors joined by an arc
//! merge into one note carrying the summed beat value.

use crate::image::GrayImage;
use crate::score::{Duration, Note, Staff};

use super::constants::*;

/// Collapse tie chains in the note list (ordered by staff, x). The
/// chain head keeps its place with `tied_beats` set; the other chain
/// members disappear.
pub fn collapse_ties(img: &GrayImage, staves: &[Staff], notes: Vec<Note>) -> Vec<Note> {
    let mut keep: Vec<Option<Note>> = notes.into_iter().map(Some).collect();

    let mut i = 0usize;
    while i < keep.len() {
        let Some(head) = keep[i].clone() else {
            i += 1;
            continue;
        };
        let staff = &staves[head.staff_index];

        // Grow the chain through consecutive same-pitch neighbors with
        // a visible arc.
        let mut chain = vec![i];
        let mut last = head.clone();
        let mut j = i + 1;
        while j < keep.len() {
            let Some(next) = keep[j].clone() else {
                j += 1;
                continue;
            };
            if next.staff_index != head.staff_index {
                break;
            }
            if next.midi_note == last.midi_note
                && (next.x - last.x) as f32 <= TIE_MAX_DX_S * staff.spacing()
                && has_tie_arc(img, staff, &last, &next)
            {
                chain.push(j);
                last = next;
                j += 1;
                continue;
            }
            break;
        }

        if chain.len() > 1 {
            let total: f32 = chain
                .iter()
                .map(|&k| keep[k].as_ref().map_or(0.0, |n| n.beats()))
                .sum();
            let (duration, dotted) = Duration::closest(total);
            let merged = keep[i].as_mut().unwrap();
            merged.tied_beats = Some(total);
            merged.duration = duration;
            merged.dotted = dotted;
            for &k in &chain[1..] {
                keep[k] = None;
            }
            i = *chain.last().unwrap() + 1;
        } else {
            i += 1;
        }
    }

    keep.into_iter().flatten().collect()
}

/// Probe the horizontal bands where a tie arc would run between two
/// heads: above or below the midline, at either of two offsets. Rows
/// under staff lines are excluded — a line crossing the band would
/// otherwise read as an arc between any two equal pitches.
fn has_tie_arc(img: &GrayImage, staff: &Staff, a: &Note, b: &Note) -> bool {
    let s = staff.spacing();
    let r = HEAD_ELLIPSE_HALF_W_S * s;
    let x0 = (a.x as f32 + r) as i64;
    let x1 = (b.x as f32 - r) as i64;
    if x1 - x0 < 2 {
        return false;
    }
    let mid_y = (a.y + b.y) as f32 / 2.0;
    let half_band = (TIE_BAND_THICKNESS_S * s / 2.0).max(1.0);

    for offset in TIE_BAND_OFFSETS_S {
        for sign in [-1.0f32, 1.0] {
            let band_y = mid_y + sign * offset * s;
            let mut total = 0u32;
            let mut dark = 0u32;
            for y in (band_y - half_band) as i64..=(band_y + half_band) as i64 {
                if super::is_line_row(staff, y) {
                    continue;
                }
                for x in x0..x1 {
                    total += 1;
                    if img.is_dark(x, y) {
                        dark += 1;
                    }
                }
            }
            if total == 0 {
                continue;
            }
            let density = dark as f32 / total as f32;
            if (TIE_DENSITY_MIN..=TIE_DENSITY_MAX).contains(&density) {
                return true;
            }
        }
    }
    false
}
