//! SoundFont-2 parser: RIFF walk, sample pool, instrument zones and
//! presets, plus the per-preset zone selection and note→zone cache the
//! renderer plays from.
//!
//! Only the chunks the synthesizer needs are consumed (`smpl`, `phdr`,
//! `pbag`, `pgen`, `inst`, `ibag`, `igen`, `shdr`); modulators and
//! unknown generators are ignored. All integers are little-endian.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::ScanError;

// Generator operators (SoundFont 2.04 specification §8.1.2), the
// recognized subset.
const GEN_START_ADDR_OFS: u16 = 0;
const GEN_END_ADDR_OFS: u16 = 1;
const GEN_START_LOOP_OFS: u16 = 2;
const GEN_END_LOOP_OFS: u16 = 3;
const GEN_START_ADDR_COARSE: u16 = 4;
const GEN_END_ADDR_COARSE: u16 = 12;
const GEN_VOL_ATTACK: u16 = 34;
const GEN_VOL_DECAY: u16 = 36;
const GEN_VOL_SUSTAIN: u16 = 37;
const GEN_VOL_RELEASE: u16 = 38;
const GEN_INSTRUMENT: u16 = 41;
const GEN_KEY_RANGE: u16 = 43;
const GEN_VEL_RANGE: u16 = 44;
const GEN_START_LOOP_COARSE: u16 = 45;
const GEN_END_LOOP_COARSE: u16 = 50;
const GEN_COARSE_TUNE: u16 = 51;
const GEN_FINE_TUNE: u16 = 52;
const GEN_SAMPLE_ID: u16 = 53;
const GEN_SAMPLE_MODES: u16 = 54;
const GEN_ROOT_KEY: u16 = 58;

/// Record sizes in the pdta sub-chunks.
const SHDR_SIZE: usize = 46;
const INST_SIZE: usize = 22;
const BAG_SIZE: usize = 4;
const GEN_SIZE: usize = 4;
const PHDR_SIZE: usize = 38;

/// Velocity the note→zone cache is built at.
pub const CACHE_VELOCITY: u8 = 80;

/// One `shdr` record; offsets index the global sample pool.
#[derive(Debug, Clone)]
pub struct SampleHeader {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub start_loop: u32,
    pub end_loop: u32,
    pub sample_rate: u32,
    pub original_pitch: u8,
    pub pitch_correction: i8,
    pub sample_link: u16,
    pub sample_type: u16,
}

/// A fully merged instrument zone, ready to render from.
#[derive(Debug, Clone)]
pub struct Zone {
    pub key_lo: u8,
    pub key_hi: u8,
    pub vel_lo: u8,
    pub vel_hi: u8,
    pub sample_index: usize,
    pub instrument_index: usize,
    pub root_key: u8,
    pub tuning_cents: f32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_loop: usize,
    pub end_loop: usize,
    pub sample_rate: u32,
    /// 0 = no loop, 1 = continuous, 3 = loop then release.
    pub loop_mode: u8,
    pub attack_s: f32,
    pub decay_s: f32,
    pub sustain_level: f32,
    pub release_s: f32,
}

impl Zone {
    pub fn key_range_contains(&self, note: u8) -> bool {
        (self.key_lo..=self.key_hi).contains(&note)
    }

    pub fn vel_range_contains(&self, vel: u8) -> bool {
        (self.vel_lo..=self.vel_hi).contains(&vel)
    }
}

/// One `phdr` record with its instrument set resolved.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub preset_num: u16,
    pub bank: u16,
    pub instrument_indices: Vec<usize>,
}

/// A parsed SoundFont. The sample pool is copied into an owned,
/// aligned `Vec<i16>` at load; the source bytes can be dropped.
#[derive(Debug)]
pub struct SoundFont {
    pub samples: Vec<i16>,
    pub sample_headers: Vec<SampleHeader>,
    pub zones: Vec<Zone>,
    pub presets: Vec<Preset>,
}

/// The renderer's active-preset view: the zone subset plus a cache of
/// the best zone per MIDI note at the reference velocity.
#[derive(Debug, Clone)]
pub struct PresetSelection {
    pub zone_indices: Vec<usize>,
    pub note_cache: [Option<usize>; 128],
}

impl SoundFont {
    /// Filter zones to the given preset and rebuild the note cache.
    /// An out-of-range index falls back to preset 0; a preset with no
    /// zones falls back to the full zone list with a warning.
    pub fn select_preset(&self, preset_index: u32) -> PresetSelection {
        let preset = self
            .presets
            .get(preset_index as usize)
            .or_else(|| self.presets.first());

        let mut zone_indices: Vec<usize> = match preset {
            Some(p) => self
                .zones
                .iter()
                .enumerate()
                .filter(|(_, z)| p.instrument_indices.contains(&z.instrument_index))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
        if zone_indices.is_empty() {
            log::warn!(
                "preset {preset_index} selects no zones; falling back to the full zone list"
            );
            zone_indices = (0..self.zones.len()).collect();
        }

        let mut note_cache = [None; 128];
        for (note, slot) in note_cache.iter_mut().enumerate() {
            *slot = find_zone(&self.zones, &zone_indices, note as u8, CACHE_VELOCITY);
        }
        PresetSelection { zone_indices, note_cache }
    }
}

/// Best zone for a note: key/velocity range matches minimizing the
/// distance to the root key, else the zone whose key-range midpoint is
/// closest.
pub fn find_zone(zones: &[Zone], indices: &[usize], note: u8, vel: u8) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for &i in indices {
        let zone = &zones[i];
        if zone.key_range_contains(note) && zone.vel_range_contains(vel) {
            let dist = (note as i32 - zone.root_key as i32).abs();
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }
    }
    if let Some((i, _)) = best {
        return Some(i);
    }

    let mut nearest: Option<(usize, i32)> = None;
    for &i in indices {
        let zone = &zones[i];
        let mid = (zone.key_lo as i32 + zone.key_hi as i32) / 2;
        let dist = (note as i32 - mid).abs();
        if nearest.map_or(true, |(_, d)| dist < d) {
            nearest = Some((i, dist));
        }
    }
    nearest.map(|(i, _)| i)
}

// ═══════════════════════════════════════════════════════════════════════
// RIFF parsing
// ═══════════════════════════════════════════════════════════════════════

/// Parse an SF2 byte buffer.
pub fn parse_soundfont(bytes: &[u8]) -> Result<SoundFont, ScanError> {
    let mut cursor = Cursor::new(bytes);
    let riff = read_tag(&mut cursor)?;
    if &riff != b"RIFF" {
        return Err(ScanError::SoundFontParse("missing RIFF header".into()));
    }
    let _file_size = read_u32(&mut cursor)?;
    let form = read_tag(&mut cursor)?;
    if &form != b"sfbk" {
        return Err(ScanError::SoundFontParse("not an sfbk form".into()));
    }

    let mut smpl: Option<&[u8]> = None;
    let mut pdta: HashMap<[u8; 4], &[u8]> = HashMap::new();

    while (cursor.position() as usize) < bytes.len() {
        let id = read_tag(&mut cursor)?;
        let size = read_u32(&mut cursor)? as usize;
        let start = cursor.position() as usize;
        let end = start + size;
        if end > bytes.len() {
            return Err(ScanError::SoundFontParse(format!(
                "chunk {} overruns the file",
                String::from_utf8_lossy(&id)
            )));
        }

        if &id == b"LIST" {
            let form = &bytes[start..start + 4];
            let body = &bytes[start + 4..end];
            match form {
                b"sdta" => smpl = find_subchunk(body, b"smpl"),
                b"pdta" => collect_subchunks(body, &mut pdta),
                _ => {}
            }
        }
        // Chunks are word-aligned.
        cursor.set_position((end + (size & 1)) as u64);
    }

    let smpl = smpl.ok_or_else(|| ScanError::SoundFontParse("missing smpl chunk".into()))?;
    let required = [b"phdr", b"pbag", b"pgen", b"inst", b"ibag", b"igen", b"shdr"];
    for tag in required {
        if !pdta.contains_key(tag) {
            return Err(ScanError::SoundFontParse(format!(
                "missing {} chunk",
                String::from_utf8_lossy(tag)
            )));
        }
    }

    // Copy the pool: the source slice has no alignment guarantee, so
    // decode sample words explicitly instead of reinterpreting.
    let mut samples = Vec::with_capacity(smpl.len() / 2);
    for pair in smpl.chunks_exact(2) {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }

    let sample_headers = parse_sample_headers(pdta[b"shdr"])?;
    let zones = parse_zones(
        pdta[b"inst"],
        pdta[b"ibag"],
        pdta[b"igen"],
        &sample_headers,
        samples.len(),
    )?;
    let presets = parse_presets(pdta[b"phdr"], pdta[b"pbag"], pdta[b"pgen"])?;

    if zones.is_empty() {
        return Err(ScanError::SoundFontParse("no usable zones".into()));
    }
    log::debug!(
        "soundfont: {} samples, {} zones, {} presets",
        sample_headers.len(),
        zones.len(),
        presets.len()
    );
    Ok(SoundFont { samples, sample_headers, zones, presets })
}

fn find_subchunk<'a>(body: &'a [u8], wanted: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = 0usize;
    while pos + 8 <= body.len() {
        let id = &body[pos..pos + 4];
        let size = u32::from_le_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]])
            as usize;
        let start = pos + 8;
        let end = (start + size).min(body.len());
        if id == wanted {
            return Some(&body[start..end]);
        }
        pos = end + (size & 1);
    }
    None
}

fn collect_subchunks<'a>(body: &'a [u8], out: &mut HashMap<[u8; 4], &'a [u8]>) {
    let mut pos = 0usize;
    while pos + 8 <= body.len() {
        let mut id = [0u8; 4];
        id.copy_from_slice(&body[pos..pos + 4]);
        let size = u32::from_le_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]])
            as usize;
        let start = pos + 8;
        let end = (start + size).min(body.len());
        out.insert(id, &body[start..end]);
        pos = end + (size & 1);
    }
}

fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<[u8; 4], ScanError> {
    let mut tag = [0u8; 4];
    cursor
        .read_exact(&mut tag)
        .map_err(|e| ScanError::SoundFontParse(format!("truncated file: {e}")))?;
    Ok(tag)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ScanError> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| ScanError::SoundFontParse(format!("truncated file: {e}")))
}

fn fixed_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Record parsing
// ═══════════════════════════════════════════════════════════════════════

fn parse_sample_headers(shdr: &[u8]) -> Result<Vec<SampleHeader>, ScanError> {
    if shdr.len() % SHDR_SIZE != 0 {
        return Err(ScanError::SoundFontParse("shdr size not a record multiple".into()));
    }
    let mut headers = Vec::new();
    for record in shdr.chunks_exact(SHDR_SIZE) {
        let mut cursor = Cursor::new(&record[20..]);
        let name = fixed_name(&record[..20]);
        // The terminal EOS record is kept; zone construction never
        // references it because no generator points there.
        headers.push(SampleHeader {
            name,
            start: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            end: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            start_loop: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            end_loop: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            sample_rate: cursor.read_u32::<LittleEndian>().unwrap_or(0),
            original_pitch: cursor.read_u8().unwrap_or(60),
            pitch_correction: cursor.read_i8().unwrap_or(0),
            sample_link: cursor.read_u16::<LittleEndian>().unwrap_or(0),
            sample_type: cursor.read_u16::<LittleEndian>().unwrap_or(0),
        });
    }
    Ok(headers)
}

/// `(bag start index)` pairs from inst/phdr records.
fn parse_index_records(
    data: &[u8],
    record_size: usize,
    bag_field_offset: usize,
) -> Vec<(String, usize)> {
    data.chunks_exact(record_size)
        .map(|record| {
            let name = fixed_name(&record[..20]);
            let bag = u16::from_le_bytes([
                record[bag_field_offset],
                record[bag_field_offset + 1],
            ]) as usize;
            (name, bag)
        })
        .collect()
}

fn parse_bags(data: &[u8]) -> Vec<usize> {
    data.chunks_exact(BAG_SIZE)
        .map(|record| u16::from_le_bytes([record[0], record[1]]) as usize)
        .collect()
}

fn parse_gens(data: &[u8]) -> Vec<(u16, u16)> {
    data.chunks_exact(GEN_SIZE)
        .map(|record| {
            (
                u16::from_le_bytes([record[0], record[1]]),
                u16::from_le_bytes([record[2], record[3]]),
            )
        })
        .collect()
}

fn timecents_to_seconds(tc: i16) -> f32 {
    2f32.powf(tc as f32 / 1200.0)
}

fn sustain_level_from_centibels(cb: i16) -> f32 {
    (1.0 - cb.max(0) as f32 / 1000.0).max(0.0)
}

fn parse_zones(
    inst: &[u8],
    ibag: &[u8],
    igen: &[u8],
    sample_headers: &[SampleHeader],
    pool_len: usize,
) -> Result<Vec<Zone>, ScanError> {
    if inst.len() % INST_SIZE != 0 {
        return Err(ScanError::SoundFontParse("inst size not a record multiple".into()));
    }
    let instruments = parse_index_records(inst, INST_SIZE, 20);
    let bags = parse_bags(ibag);
    let gens = parse_gens(igen);

    let gen_slice = |bag_idx: usize| -> &[(u16, u16)] {
        let start = bags.get(bag_idx).copied().unwrap_or(gens.len()).min(gens.len());
        let end = bags.get(bag_idx + 1).copied().unwrap_or(gens.len()).min(gens.len());
        &gens[start.min(end)..end]
    };

    let mut zones = Vec::new();
    // Last instrument record is the terminal EOI.
    for inst_idx in 0..instruments.len().saturating_sub(1) {
        let bag_start = instruments[inst_idx].1;
        let bag_end = instruments[inst_idx + 1].1;

        let mut global: HashMap<u16, u16> = HashMap::new();
        for (offset, bag_idx) in (bag_start..bag_end).enumerate() {
            let bag_gens = gen_slice(bag_idx);
            let has_sample = bag_gens.iter().any(|&(op, _)| op == GEN_SAMPLE_ID);
            if !has_sample {
                if offset == 0 {
                    global = bag_gens.iter().copied().collect();
                }
                continue;
            }

            let mut merged = global.clone();
            for &(op, amount) in bag_gens {
                merged.insert(op, amount);
            }
            if let Some(zone) = build_zone(&merged, inst_idx, sample_headers, pool_len) {
                zones.push(zone);
            }
        }
    }
    Ok(zones)
}

fn build_zone(
    gens: &HashMap<u16, u16>,
    instrument_index: usize,
    sample_headers: &[SampleHeader],
    pool_len: usize,
) -> Option<Zone> {
    let sample_index = gens.get(&GEN_SAMPLE_ID).copied()? as usize;
    let sample = sample_headers.get(sample_index)?;
    // ROM samples and linked stereo halves are not rendered.
    if sample.sample_type > 1 {
        return None;
    }

    let range = |op: u16| -> (u8, u8) {
        match gens.get(&op) {
            Some(&amount) => ((amount & 0xFF) as u8, (amount >> 8) as u8),
            None => (0, 127),
        }
    };
    let signed = |op: u16| gens.get(&op).map(|&v| v as i16).unwrap_or(0);

    let (key_lo, key_hi) = range(GEN_KEY_RANGE);
    let (vel_lo, vel_hi) = range(GEN_VEL_RANGE);

    let root_key = match gens.get(&GEN_ROOT_KEY).map(|&v| v as i16) {
        Some(v) if (0..=127).contains(&v) => v as u8,
        _ if sample.original_pitch > 127 => 60,
        _ => sample.original_pitch,
    };

    let tuning_cents = signed(GEN_COARSE_TUNE) as f32 * 100.0
        + signed(GEN_FINE_TUNE) as f32
        + sample.pitch_correction as f32;

    let offset = |base: u32, fine: u16, coarse: u16| -> i64 {
        base as i64 + signed(fine) as i64 + 32768 * signed(coarse) as i64
    };
    let start_offset = offset(sample.start, GEN_START_ADDR_OFS, GEN_START_ADDR_COARSE);
    let end_offset = offset(sample.end, GEN_END_ADDR_OFS, GEN_END_ADDR_COARSE);
    let start_loop = offset(sample.start_loop, GEN_START_LOOP_OFS, GEN_START_LOOP_COARSE);
    let end_loop = offset(sample.end_loop, GEN_END_LOOP_OFS, GEN_END_LOOP_COARSE);

    if start_offset < 0 || end_offset <= start_offset || end_offset as usize > pool_len {
        log::warn!(
            "zone for sample '{}' has bad bounds {start_offset}..{end_offset}; skipping",
            sample.name
        );
        return None;
    }

    let loop_mode = match gens.get(&GEN_SAMPLE_MODES).copied().unwrap_or(0) {
        1 => 1,
        3 => 3,
        _ => 0,
    };

    let attack = gens.get(&GEN_VOL_ATTACK).map(|&v| v as i16).unwrap_or(-12000);
    let decay = gens.get(&GEN_VOL_DECAY).map(|&v| v as i16).unwrap_or(-12000);
    let release = gens.get(&GEN_VOL_RELEASE).map(|&v| v as i16).unwrap_or(-12000);
    let sustain = gens.get(&GEN_VOL_SUSTAIN).map(|&v| v as i16).unwrap_or(0);

    Some(Zone {
        key_lo,
        key_hi,
        vel_lo,
        vel_hi,
        sample_index,
        instrument_index,
        root_key,
        tuning_cents,
        start_offset: start_offset as usize,
        end_offset: end_offset as usize,
        start_loop: start_loop.max(0) as usize,
        end_loop: end_loop.max(0) as usize,
        sample_rate: sample.sample_rate.max(1),
        loop_mode,
        attack_s: timecents_to_seconds(attack),
        decay_s: timecents_to_seconds(decay),
        sustain_level: sustain_level_from_centibels(sustain),
        release_s: timecents_to_seconds(release),
    })
}

fn parse_presets(phdr: &[u8], pbag: &[u8], pgen: &[u8]) -> Result<Vec<Preset>, ScanError> {
    if phdr.len() % PHDR_SIZE != 0 {
        return Err(ScanError::SoundFontParse("phdr size not a record multiple".into()));
    }
    let records: Vec<(String, u16, u16, usize)> = phdr
        .chunks_exact(PHDR_SIZE)
        .map(|record| {
            let name = fixed_name(&record[..20]);
            let preset_num = u16::from_le_bytes([record[20], record[21]]);
            let bank = u16::from_le_bytes([record[22], record[23]]);
            let bag = u16::from_le_bytes([record[24], record[25]]) as usize;
            (name, preset_num, bank, bag)
        })
        .collect();
    let bags = parse_bags(pbag);
    let gens = parse_gens(pgen);

    let gen_slice = |bag_idx: usize| -> &[(u16, u16)] {
        let start = bags.get(bag_idx).copied().unwrap_or(gens.len()).min(gens.len());
        let end = bags.get(bag_idx + 1).copied().unwrap_or(gens.len()).min(gens.len());
        &gens[start.min(end)..end]
    };

    let mut presets = Vec::new();
    for idx in 0..records.len().saturating_sub(1) {
        let (ref name, preset_num, bank, bag_start) = records[idx];
        let bag_end = records[idx + 1].3;
        let mut instrument_indices = Vec::new();
        for bag_idx in bag_start..bag_end {
            for &(op, amount) in gen_slice(bag_idx) {
                if op == GEN_INSTRUMENT {
                    instrument_indices.push(amount as usize);
                }
            }
        }
        presets.push(Preset {
            name: name.clone(),
            preset_num,
            bank,
            instrument_indices,
        });
    }
    Ok(presets)
}
