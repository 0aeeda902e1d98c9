//! Repeat expansion: regions delimited by repeat barlines are played
//! twice, so their events are duplicated into a slot opened after the
//! region. Expansion happens once per score; re-running is a no-op.

use crate::score::{BarlineKind, Score};

/// Expand repeat regions into the event list. Duplicated events carry
/// `repeated = true` and shifted x positions; events past a region
/// move right to make room.
pub fn expand_repeats(score: &mut Score) {
    if score.repeats_expanded {
        return;
    }
    score.repeats_expanded = true;

    let regions = repeat_regions(score);
    if regions.is_empty() {
        return;
    }
    log::debug!("expanding {} repeat region(s)", regions.len());

    for &(left, right) in regions.iter().rev() {
        let shift = right - left + 1;
        let mut duplicates = Vec::new();
        for event in &mut score.events {
            let x = event.x();
            if x > right {
                event.set_x(x + shift);
            } else if x > left {
                let mut copy = event.clone();
                copy.set_x(x + shift);
                copy.set_repeated(true);
                duplicates.push(copy);
            }
        }
        score.events.extend(duplicates);
    }
    score.sort_events();
}

/// `(left_x, right_x)` regions from the repeat barlines, with an
/// implicit start at x = 0. Barlines repeat per staff; regions are
/// deduplicated by x.
fn repeat_regions(score: &Score) -> Vec<(u32, u32)> {
    let mut marks: Vec<(u32, BarlineKind)> = score
        .metadata
        .barlines
        .iter()
        .filter(|b| {
            matches!(
                b.kind,
                BarlineKind::RepeatStart | BarlineKind::RepeatEnd | BarlineKind::RepeatBoth
            )
        })
        .map(|b| (b.x, b.kind))
        .collect();
    marks.sort_by_key(|&(x, _)| x);
    marks.dedup_by(|a, b| a.0.abs_diff(b.0) <= 4 && a.1 == b.1);

    let mut regions = Vec::new();
    let mut open = 0u32;
    for (x, kind) in marks {
        match kind {
            BarlineKind::RepeatStart => open = x,
            BarlineKind::RepeatEnd => {
                if x > open {
                    regions.push((open, x));
                }
            }
            BarlineKind::RepeatBoth => {
                if x > open {
                    regions.push((open, x));
                }
                open = x;
            }
            _ => {}
        }
    }
    regions
}
