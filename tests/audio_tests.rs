//! Renderer tests: beat layout, timing map, WAV output, voice masking,
//! and repeat expansion feeding the renderer.

mod common;

use common::wav_samples;
use pretty_assertions::assert_eq;
use sheetscan::{
    expand_repeats, render_audio, Barline, BarlineKind, Clef, Duration, KeySignature, Measure,
    Note, RenderOptions, Rest, RestKind, Score, ScoreEvent, ScoreMetadata, Staff, System,
    TimeSignature, Voice, VoiceMask,
};

const SAMPLE_RATE: f32 = 44100.0;

fn staff() -> Staff {
    Staff { lines: [101, 115, 129, 143, 157] }
}

fn note(x: u32, midi: u8, duration: Duration) -> ScoreEvent {
    ScoreEvent::Note(Note {
        x,
        y: 150,
        staff_index: 0,
        staff_position: 1,
        pitch_name: 'F',
        midi_note: midi,
        duration,
        dotted: false,
        tied_beats: None,
        stem_dir: -1,
        voice: Voice::Soprano,
        clef: Clef::Treble,
        accidental: None,
        repeated: false,
    })
}

fn rest(x: u32, kind: RestKind) -> ScoreEvent {
    ScoreEvent::Rest(Rest {
        x,
        y: 130,
        staff_index: 0,
        kind,
        dotted: false,
        voice: Voice::Soprano,
        repeated: false,
    })
}

fn score_of(events: Vec<ScoreEvent>, barlines: Vec<Barline>) -> Score {
    let total_notes = events.iter().filter(|e| !e.is_rest()).count();
    let total_rests = events.len() - total_notes;
    Score {
        events,
        measures: Vec::<Measure>::new(),
        metadata: ScoreMetadata {
            image_width: 1400,
            image_height: 300,
            staves: vec![staff()],
            clefs: vec![Clef::Treble],
            key_signature: KeySignature::none(),
            time_signature: TimeSignature::common_time(0),
            barlines,
            ledger_line_count: 0,
            systems: vec![System { top: 101, bottom: 157, staff_indices: vec![0] }],
            total_notes,
            total_rests,
        },
        repeats_expanded: false,
    }
}

#[test]
fn empty_score_renders_a_short_silence() {
    let score = score_of(Vec::new(), Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();

    assert!(out.timing_map.is_empty());
    assert!((out.total_duration_sec - 0.1).abs() < 0.01);
    let samples = wav_samples(&out.wav);
    assert_eq!(samples.len(), (0.1 * SAMPLE_RATE) as usize);
    assert!(samples.iter().all(|&s| s == 0));
}

#[test]
fn rests_only_also_render_silence() {
    let score = score_of(vec![rest(300, RestKind::Quarter)], Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();
    assert!(out.timing_map.is_empty());
    assert!((out.total_duration_sec - 0.1).abs() < 0.01);
}

#[test]
fn single_whole_note_timing_and_length() {
    let score = score_of(vec![note(300, 65, Duration::Whole)], Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();

    // Four beats at 120 BPM plus the release tail.
    assert!((out.total_duration_sec - 2.3).abs() < 0.02);
    assert_eq!(out.timing_map.len(), 1);
    let entry = out.timing_map[0];
    assert_eq!(entry.time, 0.0);
    assert_eq!(entry.x, 300);
    assert!(!entry.is_rest);

    // Byte-exact canonical header.
    let n = (wav_samples(&out.wav).len() * 2) as u32;
    let mut expected = Vec::new();
    expected.extend_from_slice(b"RIFF");
    expected.extend_from_slice(&(36 + n).to_le_bytes());
    expected.extend_from_slice(b"WAVE");
    expected.extend_from_slice(b"fmt ");
    expected.extend_from_slice(&16u32.to_le_bytes());
    expected.extend_from_slice(&1u16.to_le_bytes());
    expected.extend_from_slice(&1u16.to_le_bytes());
    expected.extend_from_slice(&44100u32.to_le_bytes());
    expected.extend_from_slice(&88200u32.to_le_bytes());
    expected.extend_from_slice(&2u16.to_le_bytes());
    expected.extend_from_slice(&16u16.to_le_bytes());
    expected.extend_from_slice(b"data");
    expected.extend_from_slice(&n.to_le_bytes());
    assert_eq!(&out.wav[..44], &expected[..]);

    // The note actually sounds.
    let samples = wav_samples(&out.wav);
    assert!(samples.iter().any(|&s| s.abs() > 500));
}

#[test]
fn tempo_scales_the_timeline() {
    let events = vec![note(100, 60, Duration::Quarter), note(200, 62, Duration::Quarter)];
    let score = score_of(events, Vec::new());

    let slow = render_audio(
        &score,
        &RenderOptions { tempo_bpm: 60, ..Default::default() },
        None,
    )
    .unwrap();
    assert!((slow.timing_map[1].time - 1.0).abs() < 1e-4);

    let fast = render_audio(
        &score,
        &RenderOptions { tempo_bpm: 240, ..Default::default() },
        None,
    )
    .unwrap();
    assert!((fast.timing_map[1].time - 0.25).abs() < 1e-4);

    // Out-of-range tempi clamp.
    let clamped = render_audio(
        &score,
        &RenderOptions { tempo_bpm: 10_000, ..Default::default() },
        None,
    )
    .unwrap();
    assert!((clamped.timing_map[1].time - 0.25).abs() < 1e-4);
}

#[test]
fn timing_map_is_monotonic_and_columns_merge() {
    // Two events 5 px apart form one chord column; the rest advance.
    let events = vec![
        note(100, 60, Duration::Quarter),
        note(105, 64, Duration::Half),
        note(200, 67, Duration::Quarter),
        rest(300, RestKind::Quarter),
        note(400, 72, Duration::Quarter),
    ];
    let score = score_of(events, Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();

    assert_eq!(out.timing_map.len(), 4);
    for pair in out.timing_map.windows(2) {
        assert!(pair[0].time <= pair[1].time);
    }
    // The chord column advances by its shortest member (one beat).
    assert!((out.timing_map[1].time - 0.5).abs() < 1e-4);
    assert!(out.timing_map[2].is_rest);
}

#[test]
fn tied_beats_override_the_notated_duration() {
    let mut long_note = note(100, 60, Duration::Half);
    if let ScoreEvent::Note(n) = &mut long_note {
        n.tied_beats = Some(3.0);
        n.dotted = true;
    }
    let events = vec![long_note, note(300, 62, Duration::Quarter)];
    let score = score_of(events, Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();

    // 3 beats at 120 BPM = 1.5 s before the second column.
    assert!((out.timing_map[1].time - 1.5).abs() < 1e-4);
}

#[test]
fn peak_never_exceeds_full_scale() {
    // A dense chord mixes well past 1.0 before normalization.
    let events: Vec<ScoreEvent> = (0u32..10)
        .map(|i| note(100 + i % 3, 60 + i as u8, Duration::Quarter))
        .collect();
    let score = score_of(events, Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();

    let samples = wav_samples(&out.wav);
    // Peak normalization leaves at most a handful of full-scale
    // samples; sustained clipping would pin long stretches there.
    let pinned = samples.iter().filter(|s| s.unsigned_abs() >= 32767).count();
    assert!(pinned < 50, "{pinned} samples at full scale");
    assert!(samples.iter().any(|&s| s.abs() > 1000));
}

#[test]
fn masked_voices_are_silent_but_keep_time() {
    let mut alto = note(100, 60, Duration::Quarter);
    if let ScoreEvent::Note(n) = &mut alto {
        n.voice = Voice::Alto;
    }
    let events = vec![alto, note(200, 72, Duration::Quarter)];
    let score = score_of(events, Vec::new());

    let mask = VoiceMask { soprano: false, alto: false, tenor: false, bass: false };
    let out = render_audio(
        &score,
        &RenderOptions { voices: mask, ..Default::default() },
        None,
    )
    .unwrap();

    // Columns still advance the cursor…
    assert_eq!(out.timing_map.len(), 2);
    assert!((out.timing_map[1].time - 0.5).abs() < 1e-4);
    // …but nothing sounds.
    assert!(wav_samples(&out.wav).iter().all(|&s| s == 0));
}

#[test]
fn repeat_expansion_doubles_the_rendered_section() {
    let events: Vec<ScoreEvent> = [250u32, 350, 450, 550]
        .iter()
        .map(|&x| note(x, 60, Duration::Quarter))
        .collect();
    let barlines = vec![
        Barline { x: 200, staff_index: 0, kind: BarlineKind::RepeatStart },
        Barline { x: 600, staff_index: 0, kind: BarlineKind::RepeatEnd },
    ];
    let mut score = score_of(events, barlines);
    expand_repeats(&mut score);

    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();
    assert_eq!(out.timing_map.len(), 8);
    // Eight quarters at 120 BPM: last column starts at 3.5 s.
    assert!((out.timing_map[7].time - 3.5).abs() < 1e-4);
    assert!((out.total_duration_sec - (4.0 + 0.3)).abs() < 0.02);
}

#[test]
fn cursor_offsets_align_with_audio_onsets() {
    let events = vec![note(100, 60, Duration::Quarter), note(200, 72, Duration::Quarter)];
    let score = score_of(events, Vec::new());
    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();
    let samples = wav_samples(&out.wav);

    let onset = (out.timing_map[1].time * SAMPLE_RATE).floor() as usize;
    // Silence cannot precede the first column, and the second onset
    // must carry fresh energy right at its floor(time × rate) sample.
    let window = &samples[onset..onset + 2000];
    assert!(window.iter().any(|&s| s.abs() > 200));
}

#[test]
fn multi_staff_systems_render_sequentially() {
    // Two single-staff systems: the second system's events start
    // after the first system's total time.
    let staff_b = Staff { lines: [401, 415, 429, 443, 457] };
    let mut second = note(100, 72, Duration::Quarter);
    if let ScoreEvent::Note(n) = &mut second {
        n.staff_index = 1;
    }
    let events = vec![note(100, 60, Duration::Whole), second];

    let mut score = score_of(events, Vec::new());
    score.metadata.staves.push(staff_b);
    score.metadata.clefs.push(Clef::Treble);
    score.metadata.systems = vec![
        System { top: 101, bottom: 157, staff_indices: vec![0] },
        System { top: 401, bottom: 457, staff_indices: vec![1] },
    ];

    let out = render_audio(&score, &RenderOptions::default(), None).unwrap();
    assert_eq!(out.timing_map.len(), 2);
    // The whole note spans 2 s at 120 BPM; system two starts after it.
    assert!((out.timing_map[1].time - 2.0).abs() < 1e-4);
}
