//! Measure grouping and rhythm quantization.
//!
//! Events bucket into measures between detected barlines. Within a
//! measure, events that share an x column sound together and advance
//! time by the shortest duration in the column. A measure whose total
//! drifts from the time signature is rescaled and re-snapped, except
//! for the first and last measures (pickup and final bars are allowed
//! to be short).

use crate::error::ScanError;
use crate::score::{Duration, Measure, RestKind, Score, ScoreEvent};

use super::constants::*;

/// Quantize event durations in place, then build `score.measures`.
pub fn group_and_quantize(score: &mut Score) -> Result<(), ScanError> {
    let expected = score.metadata.time_signature.beats_per_measure();

    for staff_index in 0..score.metadata.staves.len() {
        let (_, buckets) = staff_buckets(score, staff_index);
        let last_with_events = buckets.iter().rposition(|b| !b.is_empty()).unwrap_or(0);
        for (measure_index, bucket) in buckets.iter().enumerate() {
            // Pickup and final bars are exempt from quantization.
            if bucket.is_empty() || measure_index == 0 || measure_index == last_with_events {
                continue;
            }
            quantize_measure(score, bucket, expected)?;
        }
    }

    build_measures(score);
    Ok(())
}

/// Re-derive `score.measures` from the current event list. Called
/// again after repeat expansion, which renumbers every event.
pub fn build_measures(score: &mut Score) {
    let mut measures: Vec<Measure> = Vec::new();
    for staff_index in 0..score.metadata.staves.len() {
        let (bar_xs, buckets) = staff_buckets(score, staff_index);
        for (measure_index, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            measures.push(Measure {
                measure_index,
                staff_index,
                events: bucket,
                left: if measure_index == 0 { 0 } else { bar_xs[measure_index - 1] },
                right: bar_xs.get(measure_index).copied(),
            });
        }
    }
    measures.sort_by_key(|m| (m.staff_index, m.measure_index));
    score.measures = measures;
}

/// Per-staff barline positions and the event-index bucket between each
/// pair of boundaries.
fn staff_buckets(score: &Score, staff_index: usize) -> (Vec<u32>, Vec<Vec<usize>>) {
    let mut bar_xs: Vec<u32> = score
        .metadata
        .barlines
        .iter()
        .filter(|b| b.staff_index == staff_index)
        .map(|b| b.x)
        .collect();
    bar_xs.sort_unstable();

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bar_xs.len() + 1];
    for (idx, event) in score.events.iter().enumerate() {
        if event.staff_index() != staff_index {
            continue;
        }
        let measure = bar_xs.partition_point(|&bx| bx <= event.x());
        buckets[measure].push(idx);
    }
    (bar_xs, buckets)
}

/// Column grouping: events of one measure within
/// `BEAT_COLUMN_TOLERANCE_PX` of each other sound simultaneously.
fn beat_columns(score: &Score, bucket: &[usize]) -> Vec<Vec<usize>> {
    let mut sorted: Vec<usize> = bucket.to_vec();
    sorted.sort_by_key(|&i| score.events[i].x());

    let mut columns: Vec<Vec<usize>> = Vec::new();
    for idx in sorted {
        match columns.last_mut() {
            Some(column)
                if score.events[idx].x()
                    - score.events[*column.first().unwrap()].x()
                    <= BEAT_COLUMN_TOLERANCE_PX =>
            {
                column.push(idx)
            }
            _ => columns.push(vec![idx]),
        }
    }
    columns
}

/// Shortest-voice-advances time: a column's beat contribution is the
/// minimum duration it holds.
fn measure_beats(score: &Score, bucket: &[usize]) -> f32 {
    beat_columns(score, bucket)
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|&i| score.events[i].beats())
                .fold(f32::INFINITY, f32::min)
        })
        .sum()
}

fn quantize_measure(score: &mut Score, bucket: &[usize], expected: f32) -> Result<(), ScanError> {
    let actual = measure_beats(score, bucket);
    if actual <= 0.0 || (actual - expected).abs() <= QUANT_TOLERANCE_BEATS {
        return Ok(());
    }

    log::debug!(
        "quantizing measure: {actual:.2} beats against expected {expected:.2}"
    );
    let ratio = expected / actual;
    for &idx in bucket {
        scale_event(&mut score.events[idx], ratio);
    }

    // Residual lands on the last non-tied event of the last column.
    let residual = expected - measure_beats(score, bucket);
    if residual.abs() > 0.01 {
        if let Some(&target) = beat_columns(score, bucket)
            .last()
            .and_then(|column| {
                column.iter().rev().find(|&&i| match &score.events[i] {
                    ScoreEvent::Note(n) => n.tied_beats.is_none(),
                    ScoreEvent::Rest(_) => true,
                })
            })
        {
            let event = &mut score.events[target];
            let corrected = (event.beats() + residual).max(0.0625);
            set_event_beats(event, corrected);
        }
    }

    let residual = (expected - measure_beats(score, bucket)).abs();
    if residual > 0.5 {
        return Err(ScanError::InvariantViolated(format!(
            "quantization residual {residual:.2} beats"
        )));
    }
    Ok(())
}

/// Scale an event's duration and snap it back to the allowed set.
fn scale_event(event: &mut ScoreEvent, ratio: f32) {
    match event {
        ScoreEvent::Note(note) => {
            if let Some(tied) = note.tied_beats {
                // A collapsed tie keeps an exact beat value.
                note.tied_beats = Some(tied * ratio);
                let (duration, dotted) = Duration::closest(tied * ratio);
                note.duration = duration;
                note.dotted = dotted;
            } else {
                let (duration, dotted) = Duration::closest(note.beats() * ratio);
                note.duration = duration;
                note.dotted = dotted;
            }
        }
        ScoreEvent::Rest(rest) => {
            let (kind, dotted) = closest_rest(rest.beats() * ratio);
            rest.kind = kind;
            rest.dotted = dotted;
        }
    }
}

/// Force an exact beat value onto an event. Notes keep the value in
/// the beats override so the measure sums exactly; the printed label
/// stays the nearest named duration.
fn set_event_beats(event: &mut ScoreEvent, beats: f32) {
    match event {
        ScoreEvent::Note(note) => {
            let (duration, dotted) = Duration::closest(beats);
            note.duration = duration;
            note.dotted = dotted;
            let named = duration.base_beats() * if dotted { 1.5 } else { 1.0 };
            note.tied_beats = if (named - beats).abs() > 1e-3 { Some(beats) } else { None };
        }
        ScoreEvent::Rest(rest) => {
            let (kind, dotted) = closest_rest(beats);
            rest.kind = kind;
            rest.dotted = dotted;
        }
    }
}

fn closest_rest(beats: f32) -> (RestKind, bool) {
    const KINDS: [RestKind; 5] = [
        RestKind::Whole,
        RestKind::Half,
        RestKind::Quarter,
        RestKind::Eighth,
        RestKind::Sixteenth,
    ];
    let mut best = (RestKind::Quarter, false);
    let mut best_err = f32::INFINITY;
    for kind in KINDS {
        for dotted in [false, true] {
            let value = kind.base_beats() * if dotted { 1.5 } else { 1.0 };
            let err = (beats - value).abs();
            if err < best_err {
                best_err = err;
                best = (kind, dotted);
            }
        }
    }
    best
}
