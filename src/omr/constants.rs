//! Shared thresholds for the recognition stages. Distances are in
//! pixels unless suffixed; factors are multiples of the staff spacing
//! `s` (or the half-space where noted).

// ── Staff detection ─────────────────────────────────────────────────
pub(super) const ROW_DARK_FRACTION: f32 = 0.30; // fraction of ink that makes a row a line candidate
pub(super) const MAX_LINE_THICKNESS: u32 = 6; // thicker runs are beams/text, not staff lines
pub(super) const STAFF_GAP_FACTOR: f32 = 2.2; // × median gap: larger jumps start a new staff

// ── System pairing ──────────────────────────────────────────────────
pub(super) const PAIR_GAP_FACTOR: f32 = 6.0; // × staff height: closer staves pair outright
pub(super) const BRACE_REGION_FRACTION: f32 = 0.08; // leftmost slice searched for brace/systemic barline
pub(super) const BRACE_COVER_FRACTION: f32 = 0.60; // of the inter-staff gap a brace run must span
pub(super) const BRACE_BRIDGE_FRACTION: f32 = 0.15; // of the gap height bridgeable as run gaps

// ── Clef classification ─────────────────────────────────────────────
pub(super) const CLEF_REGION_FRACTION: f32 = 0.14;
pub(super) const TREBLE_ABOVE_S: f32 = 1.0; // blob reach above line 1
pub(super) const TREBLE_BELOW_S: f32 = 0.5; // blob reach below line 5
pub(super) const TREBLE_MIN_EXTENT_S: f32 = 3.8;
pub(super) const BASS_MAX_EXTENT_S: f32 = 5.5;
pub(super) const C_CLEF_MIN_EXTENT_S: f32 = 2.0;
pub(super) const C_CLEF_MAX_EXTENT_S: f32 = 4.5;
pub(super) const C_CLEF_BAND_S: f32 = 0.6; // ± band around the snapped line
pub(super) const C_CLEF_BAND_DENSITY: f32 = 0.30;

// ── Time signature ──────────────────────────────────────────────────
pub(super) const TIME_SCAN_START_FRACTION: f32 = 0.06;
pub(super) const TIME_SCAN_END_FRACTION: f32 = 0.22;
pub(super) const TIME_WINDOW_S: f32 = 1.5;
pub(super) const TIME_HALF_DENSITY_MIN: f32 = 0.15;
pub(super) const TIME_HALF_DENSITY_MAX: f32 = 0.55;

// ── Barlines ────────────────────────────────────────────────────────
pub(super) const BARLINE_REGION_FRACTION: f32 = 0.16; // skip the clef/key/time prefix
pub(super) const BARLINE_COLUMN_FRACTION: f32 = 0.80; // of rows line1..line5 that must be ink
pub(super) const BARLINE_MIN_SEPARATION_S: f32 = 1.5;
pub(super) const DOUBLE_BAR_MIN_DX: u32 = 2;
pub(super) const DOUBLE_BAR_MAX_DX: u32 = 6;
pub(super) const FINAL_BAR_MIN_THICKNESS: u32 = 3;
pub(super) const MIN_MEASURE_WIDTH_S: f32 = 6.0;

// ── Ledger lines ────────────────────────────────────────────────────
pub(super) const LEDGER_RANGE_SPACINGS: i32 = 5;
pub(super) const LEDGER_MIN_LEN_S: f32 = 0.8;
pub(super) const LEDGER_MAX_LEN_S: f32 = 4.0;
pub(super) const LEDGER_MAX_THICKNESS: u32 = 5;

// ── Noteheads ───────────────────────────────────────────────────────
pub(super) const HEAD_DARK_LUMA: u8 = 110;
pub(super) const HEAD_SCAN_MARGIN_S: f32 = 3.0;
pub(super) const HEAD_SCAN_MARGIN_LYRICS_S: f32 = 2.0;
pub(super) const LYRICS_GAP_S: f32 = 3.0; // inter-staff gap beyond which lyrics are assumed
pub(super) const HEAD_ELLIPSE_HALF_W_S: f32 = 0.55;
pub(super) const HEAD_ELLIPSE_HALF_H_S: f32 = 0.40;
pub(super) const HEAD_MIN_SAMPLES: usize = 8;
pub(super) const HEAD_MIN_FILL: f32 = 0.48;
pub(super) const HEAD_ASPECT_MIN: f32 = 0.55;
pub(super) const HEAD_ASPECT_MAX: f32 = 2.5;
pub(super) const HEAD_MAX_VERTICAL_RUN_S: f32 = 3.0;
pub(super) const HEAD_SYMMETRY_MIN: f32 = 0.30;
pub(super) const HEAD_SNAP_MAX_ERROR: f32 = 0.38; // half-spaces
pub(super) const HEAD_POSITION_MIN: i32 = -5;
pub(super) const HEAD_POSITION_MAX: i32 = 13;
pub(super) const HEAD_DEDUP_CHEBYSHEV_S: f32 = 1.0;

// ── Inline accidentals ──────────────────────────────────────────────
pub(super) const ACC_SCAN_LEFT_S: f32 = 2.5;
pub(super) const ACC_SCAN_HALF_HEIGHT_S: f32 = 1.2;
pub(super) const ACC_VRUN_MIN_S: f32 = 0.8;
pub(super) const ACC_VRUN_DEDUP_S: f32 = 0.25;
pub(super) const ACC_HRUN_MIN_S: f32 = 0.5;
pub(super) const SHARP_MIN_DENSITY: f32 = 0.22;
pub(super) const SHARP_TB_BALANCE: f32 = 0.35;
pub(super) const FLAT_MIN_DENSITY: f32 = 0.15;
pub(super) const FLAT_MIN_ASPECT: f32 = 1.5;
pub(super) const NATURAL_MIN_DENSITY: f32 = 0.16;
pub(super) const NATURAL_MIN_ASPECT: f32 = 1.3;
pub(super) const NATURAL_HRUN_MIN_S: f32 = 0.3;
pub(super) const NATURAL_HRUN_MAX_S: f32 = 1.2;

// ── Rests ───────────────────────────────────────────────────────────
pub(super) const REST_GAP_MIN_S: f32 = 2.5;
pub(super) const REST_WINDOW_W_S: f32 = 1.2;
pub(super) const REST_WINDOW_STEP_S: f32 = 0.5;
pub(super) const REST_DENSITY_MIN: f32 = 0.12;
pub(super) const REST_DENSITY_MAX: f32 = 0.45;
pub(super) const REST_BARLINE_COVER: f32 = 0.60; // vertical run fraction that flags a barline instead
pub(super) const REST_DOT_SCAN_S: f32 = 2.0;

// ── Stems / beams / flags ───────────────────────────────────────────
pub(super) const STEM_PROBE_MIN_S: f32 = 0.4;
pub(super) const STEM_PROBE_MAX_S: f32 = 1.0;
pub(super) const STEM_GAP_TOLERANCE: u32 = 4;
pub(super) const STEM_MIN_LENGTH_S: f32 = 1.5;
pub(super) const BEAM_LEVEL_STEP_S: f32 = 0.45;
pub(super) const BEAM_BAND_S: f32 = 0.25;
pub(super) const BEAM_MIN_RUN_S: f32 = 0.5;
pub(super) const BEAM_HOOK_MIN_S: f32 = 0.3;
pub(super) const BEAM_HOOK_MAX_S: f32 = 1.5;
pub(super) const FLAG_ZONE_W_S: f32 = 0.7;
pub(super) const FLAG_ZONE_H_S: f32 = 1.2;
pub(super) const FLAG_MIN_FILL: f32 = 0.25;

// ── Fill vote ───────────────────────────────────────────────────────
pub(super) const FILL_RECT_DENSITY: f32 = 0.35;
pub(super) const FILL_CROSS_DENSITY: f32 = 0.40;
pub(super) const FILL_PATCH_DENSITY: f32 = 0.30;

// ── Augmentation dots ───────────────────────────────────────────────
pub(super) const DOT_SCAN_MIN_S: f32 = 0.7;
pub(super) const DOT_SCAN_MAX_S: f32 = 2.2;
pub(super) const DOT_RADIUS_S: f32 = 0.22;
pub(super) const DOT_MIN_FILL: f32 = 0.55;

// ── Ties ────────────────────────────────────────────────────────────
pub(super) const TIE_MAX_DX_S: f32 = 8.0;
pub(super) const TIE_BAND_OFFSETS_S: [f32; 2] = [0.8, 1.2];
pub(super) const TIE_BAND_THICKNESS_S: f32 = 0.3;
pub(super) const TIE_DENSITY_MIN: f32 = 0.12;
pub(super) const TIE_DENSITY_MAX: f32 = 0.55;

// ── Beat columns & quantization ─────────────────────────────────────
pub(super) const BEAT_COLUMN_TOLERANCE_PX: u32 = 10;
pub(super) const QUANT_TOLERANCE_BEATS: f32 = 0.1;
