//! Sample synthesizer: renders one note as mono 44100 Hz PCM by
//! pitch-shifting and looping the best-matching SoundFont zone sample
//! under the zone's volume envelope. Without a SoundFont it falls back
//! to a four-harmonic additive tone.

use crate::sf2::{find_zone, PresetSelection, SoundFont, Zone};

pub const SAMPLE_RATE: f32 = 44100.0;

/// Output gain applied after the envelope, before velocity scaling.
const ZONE_GAIN: f32 = 0.85;

/// Loops shorter than this many sample frames are treated as absent.
const MIN_LOOP_LEN: usize = 32;

/// Render one note. Uses the preset's note cache when it covers the
/// note, looks a zone up otherwise, and falls back to the additive
/// tone when the selection is empty.
pub fn render_note(
    sf: &SoundFont,
    selection: &PresetSelection,
    note: u8,
    duration_s: f32,
    velocity: u8,
) -> Vec<f32> {
    let zone_idx = selection.note_cache[note.min(127) as usize]
        .or_else(|| find_zone(&sf.zones, &selection.zone_indices, note, velocity));
    match zone_idx {
        Some(idx) => render_zone(sf, &sf.zones[idx], note, duration_s, velocity),
        None => fallback_tone(note, duration_s, velocity),
    }
}

/// Pitch-shifted, looped, enveloped read of one zone's sample.
pub fn render_zone(
    sf: &SoundFont,
    zone: &Zone,
    note: u8,
    duration_s: f32,
    velocity: u8,
) -> Vec<f32> {
    let count = (duration_s * SAMPLE_RATE).max(1.0) as usize;
    let mut out = vec![0.0f32; count];

    let semitones = note as f32 - zone.root_key as f32 + zone.tuning_cents / 100.0;
    let pitch_ratio =
        2f32.powf(semitones / 12.0) as f64 * (zone.sample_rate as f64 / SAMPLE_RATE as f64);

    let loop_len = zone.end_loop.saturating_sub(zone.start_loop);
    let looping = matches!(zone.loop_mode, 1 | 3)
        && loop_len >= MIN_LOOP_LEN
        && zone.start_loop >= zone.start_offset
        && zone.end_loop <= zone.end_offset
        && zone.end_loop <= sf.samples.len();

    let envelope = Envelope::for_zone(zone, duration_s, count);
    let gain = velocity.min(127) as f32 / 127.0 * ZONE_GAIN;

    let mut pos = zone.start_offset as f64;
    for (i, slot) in out.iter_mut().enumerate() {
        let idx = pos as usize;
        if !looping && idx + 1 >= zone.end_offset {
            break;
        }
        let frac = (pos - idx as f64) as f32;
        let mut next = idx + 1;
        if looping && next >= zone.end_loop {
            // The interpolation neighbor wraps at the loop seam.
            next = zone.start_loop;
        }
        let a = sf.samples.get(idx).copied().unwrap_or(0) as f32 / 32768.0;
        let b = sf.samples.get(next).copied().unwrap_or(0) as f32 / 32768.0;
        let sample = (a + (b - a) * frac) * envelope.level_at(i) * gain;
        *slot = if sample.is_finite() { sample } else { 0.0 };

        pos += pitch_ratio;
        if looping && pos >= zone.end_loop as f64 {
            let offset = (pos - zone.start_loop as f64) % loop_len as f64;
            pos = zone.start_loop as f64 + offset;
        }
    }
    out
}

/// Linear ADSR evaluated per output sample.
struct Envelope {
    attack_end: f32,
    decay_end: f32,
    sustain: f32,
    release_start: f32,
    release_len: f32,
}

impl Envelope {
    fn for_zone(zone: &Zone, duration_s: f32, count: usize) -> Envelope {
        let attack = zone.attack_s.min(2.0).max(0.005) * SAMPLE_RATE;
        let decay = zone.decay_s.min(4.0).max(0.01) * SAMPLE_RATE;
        let release = zone
            .release_s
            .min(0.3 * duration_s)
            .min(2.0)
            .max(0.02)
            * SAMPLE_RATE;
        Envelope {
            attack_end: attack,
            decay_end: attack + decay,
            sustain: zone.sustain_level.clamp(0.0, 1.0),
            release_start: count as f32 - release,
            release_len: release.max(1.0),
        }
    }

    fn level_at(&self, i: usize) -> f32 {
        let i = i as f32;
        let base = if i < self.attack_end {
            i / self.attack_end.max(1.0)
        } else if i < self.decay_end {
            let t = (i - self.attack_end) / (self.decay_end - self.attack_end).max(1.0);
            1.0 - (1.0 - self.sustain) * t
        } else {
            self.sustain
        };
        if i >= self.release_start {
            let t = ((i - self.release_start) / self.release_len).min(1.0);
            base * (1.0 - t)
        } else {
            base
        }
    }
}

/// Additive fallback when no SoundFont is loaded: four harmonics under
/// a fixed ADSR.
pub fn fallback_tone(note: u8, duration_s: f32, velocity: u8) -> Vec<f32> {
    const WEIGHTS: [f32; 4] = [1.0, 0.35, 0.15, 0.06];
    const NORM: f32 = 1.56;

    let count = (duration_s * SAMPLE_RATE).max(1.0) as usize;
    let freq = 440.0 * 2f32.powf((note as f32 - 69.0) / 12.0);
    let gain = velocity.min(127) as f32 / 127.0 * 0.75;

    let attack = 0.008 * SAMPLE_RATE;
    let decay = 0.150 * SAMPLE_RATE;
    let sustain = 0.6f32;
    let release = (0.3 * duration_s).min(0.2).max(0.01) * SAMPLE_RATE;
    let release_start = count as f32 - release;

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let t = i as f32 / SAMPLE_RATE;
        let mut sample = 0.0f32;
        for (harmonic, &weight) in WEIGHTS.iter().enumerate() {
            let h_freq = freq * (harmonic as f32 + 1.0);
            if h_freq < SAMPLE_RATE / 2.0 {
                sample += weight * (2.0 * std::f32::consts::PI * h_freq * t).sin();
            }
        }
        sample /= NORM;

        let fi = i as f32;
        let mut env = if fi < attack {
            fi / attack
        } else if fi < attack + decay {
            1.0 - (1.0 - sustain) * (fi - attack) / decay
        } else {
            sustain
        };
        if fi >= release_start {
            env *= (1.0 - (fi - release_start) / release.max(1.0)).max(0.0);
        }

        let value = sample * env * gain;
        out.push(if value.is_finite() { value } else { 0.0 });
    }
    out
}
