//! Audio renderer: walks the score system by system, groups events
//! into beat columns, synthesizes and mixes every column into one
//! master buffer, and encodes canonical PCM-16 mono WAV bytes plus the
//! cursor timing map the host animates from.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::score::{Score, ScoreEvent, System, Voice};
use crate::sf2::SoundFont;
use crate::synth;

pub const SAMPLE_RATE: u32 = 44100;

/// Events within this many pixels sound simultaneously.
const COLUMN_TOLERANCE_PX: u32 = 8;

/// Tail appended after the last event, in seconds.
const RELEASE_TAIL_S: f32 = 0.3;

/// Velocity all notes are rendered at (also the zone-cache velocity).
const NOTE_VELOCITY: u8 = 80;

/// Which SATB voices sound. Masked voices keep their place in the
/// beat grid; they are only excluded from synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMask {
    pub soprano: bool,
    pub alto: bool,
    pub tenor: bool,
    pub bass: bool,
}

impl VoiceMask {
    pub fn all() -> Self {
        Self { soprano: true, alto: true, tenor: true, bass: true }
    }

    pub fn allows(&self, voice: Voice) -> bool {
        match voice {
            Voice::Soprano => self.soprano,
            Voice::Alto => self.alto,
            Voice::Tenor => self.tenor,
            Voice::Bass => self.bass,
        }
    }
}

impl Default for VoiceMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Rendering parameters.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Beats per minute, clamped to 40..240.
    pub tempo_bpm: u16,
    pub preset_index: u32,
    pub voices: VoiceMask,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { tempo_bpm: 120, preset_index: 0, voices: VoiceMask::all() }
    }
}

/// One cursor step: when a beat column sounds and where it sits on the
/// page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub time: f32,
    pub x: u32,
    pub y: u32,
    pub staff_index: u32,
    pub is_rest: bool,
}

/// The renderer's output bundle.
#[derive(Debug, Clone)]
pub struct RenderedAudio {
    pub wav: Vec<u8>,
    pub timing_map: Vec<CursorEntry>,
    pub total_duration_sec: f32,
}

/// Serialize the timing map for the host cursor.
pub fn timing_map_to_json(map: &[CursorEntry]) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "[]".to_string())
}

/// Render the score. A score without notes yields 0.1 s of silence
/// and an empty map; a missing or unusable SoundFont falls back to
/// synthesized tones.
pub fn render_audio(
    score: &Score,
    options: &RenderOptions,
    sf2: Option<&SoundFont>,
) -> Result<RenderedAudio, ScanError> {
    let tempo = options.tempo_bpm.clamp(40, 240);
    let seconds_per_beat = 60.0 / tempo as f32;

    if score.notes().next().is_none() {
        log::debug!("score has no playable events; rendering silence");
        let silent = vec![0.0f32; (0.1 * SAMPLE_RATE as f32) as usize];
        return Ok(RenderedAudio {
            wav: encode_wav(&silent),
            timing_map: Vec::new(),
            total_duration_sec: silent.len() as f32 / SAMPLE_RATE as f32,
        });
    }

    let (timing_map, tasks, total_beats_time) =
        layout_columns(score, seconds_per_beat, &options.voices);

    // Mix.
    let total_len = ((total_beats_time + RELEASE_TAIL_S) * SAMPLE_RATE as f32) as usize;
    let mut master = vec![0.0f32; total_len.max(1)];
    let selection = sf2.map(|sf| sf.select_preset(options.preset_index));

    for task in &tasks {
        for &(midi, duration_s) in &task.notes {
            let rendered = match (sf2, &selection) {
                (Some(sf), Some(sel)) => synth::render_note(sf, sel, midi, duration_s, NOTE_VELOCITY),
                _ => synth::fallback_tone(midi, duration_s, NOTE_VELOCITY),
            };
            mix_into(&mut master, task.offset_samples, &rendered);
        }
    }

    for sample in &mut master {
        if !sample.is_finite() {
            *sample = 0.0;
        }
    }
    let peak = master.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        for sample in &mut master {
            *sample /= peak;
        }
    }

    Ok(RenderedAudio {
        wav: encode_wav(&master),
        timing_map,
        total_duration_sec: master.len() as f32 / SAMPLE_RATE as f32,
    })
}

/// One column's synthesis work.
struct RenderTask {
    offset_samples: usize,
    /// `(midi note, duration seconds)`.
    notes: Vec<(u8, f32)>,
}

/// Walk systems sequentially, grouping events into beat columns and
/// producing the timing map and render tasks.
fn layout_columns(
    score: &Score,
    seconds_per_beat: f32,
    voices: &VoiceMask,
) -> (Vec<CursorEntry>, Vec<RenderTask>, f32) {
    let systems = effective_systems(score);
    let mut timing_map = Vec::new();
    let mut tasks = Vec::new();
    let mut global_time = 0.0f32;

    for system in &systems {
        let mut events: Vec<&ScoreEvent> = score
            .events
            .iter()
            .filter(|e| system.staff_indices.contains(&e.staff_index()))
            .collect();
        events.sort_by_key(|e| e.x());

        let mut column: Vec<&ScoreEvent> = Vec::new();
        let mut i = 0usize;
        while i <= events.len() {
            let belongs = i < events.len()
                && column
                    .first()
                    .map_or(true, |first| events[i].x() - first.x() <= COLUMN_TOLERANCE_PX);
            if belongs {
                column.push(events[i]);
                i += 1;
                continue;
            }
            if !column.is_empty() {
                global_time = emit_column(
                    &column,
                    global_time,
                    seconds_per_beat,
                    voices,
                    &mut timing_map,
                    &mut tasks,
                );
                column.clear();
            }
            if i >= events.len() {
                break;
            }
        }
    }
    (timing_map, tasks, global_time)
}

fn emit_column(
    column: &[&ScoreEvent],
    global_time: f32,
    seconds_per_beat: f32,
    voices: &VoiceMask,
    timing_map: &mut Vec<CursorEntry>,
    tasks: &mut Vec<RenderTask>,
) -> f32 {
    let n = column.len() as u64;
    let mean_x = (column.iter().map(|e| e.x() as u64).sum::<u64>() / n) as u32;
    let mean_y = (column.iter().map(|e| e.y() as u64).sum::<u64>() / n) as u32;
    timing_map.push(CursorEntry {
        time: global_time,
        x: mean_x,
        y: mean_y,
        staff_index: column[0].staff_index() as u32,
        is_rest: column.iter().all(|e| e.is_rest()),
    });

    let notes: Vec<(u8, f32)> = column
        .iter()
        .filter_map(|event| match event {
            ScoreEvent::Note(note) if voices.allows(note.voice) => {
                Some((note.midi_note, note.beats() * seconds_per_beat))
            }
            _ => None,
        })
        .collect();
    if !notes.is_empty() {
        tasks.push(RenderTask {
            offset_samples: (global_time * SAMPLE_RATE as f32) as usize,
            notes,
        });
    }

    let min_beats = column
        .iter()
        .map(|e| e.beats())
        .fold(f32::INFINITY, f32::min);
    global_time + min_beats * seconds_per_beat
}

/// Systems from the metadata, or adjacent-staff pairs when the
/// metadata carries none.
fn effective_systems(score: &Score) -> Vec<System> {
    if !score.metadata.systems.is_empty() {
        return score.metadata.systems.clone();
    }
    let staves = &score.metadata.staves;
    let mut systems = Vec::new();
    let mut i = 0usize;
    while i < staves.len() {
        let indices: Vec<usize> = if i + 1 < staves.len() {
            vec![i, i + 1]
        } else {
            vec![i]
        };
        systems.push(System {
            top: staves[i].top(),
            bottom: staves[*indices.last().unwrap()].bottom(),
            staff_indices: indices,
        });
        i += 2;
    }
    systems
}

fn mix_into(master: &mut [f32], offset: usize, rendered: &[f32]) {
    if offset >= master.len() {
        return;
    }
    let span = (master.len() - offset).min(rendered.len());
    for i in 0..span {
        master[offset + i] += rendered[i];
    }
}

// ═══════════════════════════════════════════════════════════════════════
// WAV encoding
// ═══════════════════════════════════════════════════════════════════════

/// Canonical PCM-16 mono 44100 Hz WAV bytes.
pub fn encode_wav(samples: &[f32]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + samples.len() * 2);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for &sample in samples {
        out.extend_from_slice(&float_to_i16(sample).to_le_bytes());
    }
    out
}

fn float_to_i16(sample: f32) -> i16 {
    let clipped = sample.clamp(-1.0, 1.0);
    if clipped < 0.0 {
        (clipped * 0x8000 as f32) as i16
    } else {
        (clipped * 0x7FFF as f32) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_byte_exact() {
        let wav = encode_wav(&[0.0f32; 100]);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 36 + 200);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 44100);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 88200);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into().unwrap()), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 200);
        assert_eq!(wav.len(), 44 + 200);
    }

    #[test]
    fn float_conversion_is_asymmetric_like_pcm() {
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(float_to_i16(1.0), 0x7FFF);
        assert_eq!(float_to_i16(-1.0), -0x8000);
        assert_eq!(float_to_i16(2.0), 0x7FFF, "clipped above");
        assert_eq!(float_to_i16(-2.0), -0x8000, "clipped below");
    }

    #[test]
    fn mixing_clips_to_the_buffer_end() {
        let mut master = vec![0.0f32; 10];
        mix_into(&mut master, 8, &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(master[8], 1.0);
        assert_eq!(master[9], 1.0);
        // No panic, nothing written past the end.
        mix_into(&mut master, 20, &[1.0]);
    }

    #[test]
    fn voice_mask_filters_by_voice() {
        let mask = VoiceMask { soprano: true, alto: false, tenor: true, bass: false };
        assert!(mask.allows(Voice::Soprano));
        assert!(!mask.allows(Voice::Alto));
        assert!(mask.allows(Voice::Tenor));
        assert!(!mask.allows(Voice::Bass));
    }
}
