//! End-to-end recognition tests over synthetic pages: image bytes in,
//! symbolic score out.

mod common;

use common::PagePainter;
use pretty_assertions::assert_eq;
use sheetscan::{
    process_sheet, process_sheet_with, CancelToken, Classifiers, Duration, ProcessOptions,
    ScanError, Voice,
};

#[test]
fn blank_page_has_no_staves() {
    let page = PagePainter::new(800, 600);
    match process_sheet(&page.to_png(), &Classifiers::none()) {
        Err(ScanError::NoStavesDetected) => {}
        other => panic!("expected NoStavesDetected, got {other:?}"),
    }
}

#[test]
fn single_whole_note_on_a_treble_staff() {
    let mut page = PagePainter::new(800, 600);
    page.staff(250, 14);
    // Hollow head in the bottom space (position 1, F4), no stem.
    page.hollow_head(300.0, 300.0);
    let score = process_sheet(&page.to_png(), &Classifiers::none()).unwrap();

    assert_eq!(score.staff_count(), 1);
    assert_eq!(score.metadata.total_notes, 1);
    assert_eq!(score.metadata.total_rests, 0);

    let note = score.notes().next().unwrap();
    assert_eq!(note.pitch_name, 'F');
    assert_eq!(note.midi_note, 65);
    assert_eq!(note.duration, Duration::Whole);
    assert!(!note.dotted);
    assert_eq!(note.voice, Voice::Soprano);
    assert_eq!(note.staff_position, 1);
    assert!((note.x as i64 - 300).abs() <= 4);

    // Bare staff defaults.
    assert_eq!(score.metadata.clefs, vec![sheetscan::Clef::Treble]);
    assert_eq!(score.metadata.time_signature.beats, 4);
    assert_eq!(score.metadata.time_signature.beat_type, 4);
    assert_eq!(score.metadata.key_signature, sheetscan::KeySignature::none());
}

#[test]
fn grand_staff_scale_of_quarters() {
    let mut page = PagePainter::new(1000, 800);
    page.staff(250, 14); // treble, detected lines 251..307
    page.staff(450, 14); // bass, empty
    // Ascending C4..C5 as stemmed filled quarters. Bottom line = 307,
    // half-space = 7; position p sits at y = 307 − 7p.
    let positions: [i32; 8] = [-2, -1, 0, 1, 2, 3, 4, 5];
    for (i, &p) in positions.iter().enumerate() {
        let x = 260 + (i as i64 % 4) * 60 + (i as i64 / 4) * 240;
        let y = 307 - 7 * p as i64;
        page.filled_head(x as f32, y as f32);
        page.stem_up(x, y);
    }
    // Barlines through both staves after each group of four.
    for bar_x in [470i64, 710] {
        page.vline(bar_x, 251, 308, 2);
        page.vline(bar_x, 451, 508, 2);
    }

    let score = process_sheet(&page.to_png(), &Classifiers::none()).unwrap();

    assert_eq!(score.staff_count(), 2);
    assert_eq!(score.metadata.systems.len(), 1, "staves should pair into one system");
    assert_eq!(score.metadata.clefs, vec![sheetscan::Clef::Treble, sheetscan::Clef::Bass]);

    let midis: Vec<u8> = score.notes().map(|n| n.midi_note).collect();
    assert_eq!(midis, vec![60, 62, 64, 65, 67, 69, 71, 72]);
    assert!(score.notes().all(|n| n.duration == Duration::Quarter));
    assert!(score.notes().all(|n| n.voice == Voice::Soprano));

    // Two barlines per staff, two measures of four notes on the treble.
    let treble_bars = score
        .metadata
        .barlines
        .iter()
        .filter(|b| b.staff_index == 0)
        .count();
    assert_eq!(treble_bars, 2);
    let treble_measures: Vec<usize> = score
        .measures
        .iter()
        .filter(|m| m.staff_index == 0)
        .map(|m| m.events.len())
        .collect();
    assert_eq!(treble_measures, vec![4, 4]);

    // Beat sums per measure (property 3).
    for measure in score.measures.iter().filter(|m| m.staff_index == 0) {
        let total: f32 = measure.events.iter().map(|&i| score.events[i].beats()).sum();
        assert!((total - 4.0).abs() < 0.5, "measure sums to {total}");
    }
    score.verify_invariants().unwrap();
}

#[test]
fn events_are_ordered_by_staff_then_x() {
    let mut page = PagePainter::new(1000, 800);
    page.staff(250, 14);
    page.staff(450, 14);
    for x in [300.0f32, 500.0, 700.0] {
        page.filled_head(x, 300.0); // treble space, position 1
        page.filled_head(x, 500.0); // bass space
    }
    let score = process_sheet(&page.to_png(), &Classifiers::none()).unwrap();

    for pair in score.events.windows(2) {
        let a = (pair[0].staff_index(), pair[0].x());
        let b = (pair[1].staff_index(), pair[1].x());
        assert!(a <= b, "events out of order: {a:?} then {b:?}");
    }
}

#[test]
fn injected_key_signature_sharpens_the_top_line() {
    let mut page = PagePainter::new(800, 600);
    page.staff(250, 14);
    // Stemless filled head on the top line: F5, position 8.
    page.filled_head(300.0, 251.0);

    let classifiers = Classifiers::none()
        .with_key_type(Box::new(|_| vec![0.0, 1.0, 0.0]))
        .with_key_digit(Box::new(|_| {
            let mut out = vec![0.0; 11];
            out[2] = 1.0; // D major: F# C#
            out
        }));
    let score = process_sheet(&page.to_png(), &classifiers).unwrap();

    assert_eq!(score.metadata.key_signature.count, 2);
    let note = score.notes().next().unwrap();
    assert_eq!(note.pitch_name, 'F');
    assert_eq!(note.midi_note, 78, "F5 must read as F#5 under two sharps");
}

#[test]
fn ocr_gate_drops_candidates_read_as_rests() {
    let mut page = PagePainter::new(800, 600);
    page.staff(250, 14);
    page.filled_head(300.0, 300.0);

    // A classifier that calls everything a confident quarter rest.
    let classifiers = Classifiers::none().with_ocr(Box::new(|_| {
        let mut out = vec![0.0; sheetscan::classifiers::OCR_CLASSES];
        out[14] = 9.0;
        out
    }));
    let score = process_sheet(&page.to_png(), &classifiers).unwrap();
    assert_eq!(score.metadata.total_notes, 0);
}

#[test]
fn cancelled_token_stops_the_pipeline() {
    let mut page = PagePainter::new(800, 600);
    page.staff(250, 14);
    let cancel = CancelToken::new();
    cancel.cancel();

    match process_sheet_with(
        &page.to_png(),
        &Classifiers::none(),
        &ProcessOptions::default(),
        &cancel,
    ) {
        Err(ScanError::Cancelled(_)) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[test]
fn garbage_bytes_report_a_decode_error() {
    match process_sheet(&[0xDE, 0xAD, 0xBE, 0xEF], &Classifiers::none()) {
        Err(ScanError::ImageDecode(_)) => {}
        other => panic!("expected ImageDecode, got {other:?}"),
    }
}

#[test]
fn score_json_round_trips() {
    let mut page = PagePainter::new(800, 600);
    page.staff(250, 14);
    page.hollow_head(300.0, 300.0);
    let score = process_sheet(&page.to_png(), &Classifiers::none()).unwrap();

    let json = sheetscan::score_to_json(&score);
    let back = sheetscan::score_from_json(&json).unwrap();
    assert_eq!(score, back);
}
