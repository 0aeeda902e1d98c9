//! The recognition pipeline — from a luma buffer to a symbolic score.
//!
//! Stages run sequentially over the image: staves → layout (clefs,
//! signatures, barlines, ledger lines) → symbols (noteheads, rests,
//! accidentals) → rhythm and pitch → measures → repeat expansion. The
//! driver checks the cancellation token between stages; each stage is
//! a pure function over the immutable image plus earlier results.

pub(crate) mod constants;

mod accidentals;
mod barlines;
mod clef;
mod measures;
mod noteheads;
mod pitch;
mod repeats;
mod rests;
mod rhythm;
mod signatures;
mod staff;
mod ties;

pub use repeats::expand_repeats;
pub use staff::LedgerLine;

use crate::cancel::CancelToken;
use crate::classifiers::{Classifiers, OcrReading};
use crate::error::ScanError;
use crate::image::GrayImage;
use crate::score::{
    Accidental, Duration, Score, ScoreMetadata, ScoreEvent, Staff,
};

/// A notehead candidate flowing through the symbol stages. Detection
/// fills position; the gate attaches the OCR reading; rhythm fills
/// duration, stem and dot; pitch turns the survivors into notes.
#[derive(Debug, Clone)]
pub(crate) struct HeadCandidate {
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    /// Snapped staff position (0 = bottom line, half-space steps).
    pub position: i32,
    pub ocr: Option<OcrReading>,
    pub low_conf: bool,
    pub accidental: Option<Accidental>,
    pub duration: Duration,
    pub dotted: bool,
    /// -1 stem up, +1 stem down, 0 none.
    pub stem_dir: i8,
}

impl HeadCandidate {
    fn new(x: u32, y: u32, staff_index: usize, position: i32) -> Self {
        Self {
            x,
            y,
            staff_index,
            position,
            ocr: None,
            low_conf: false,
            accidental: None,
            duration: Duration::Quarter,
            dotted: false,
            stem_dir: 0,
        }
    }
}

/// Run the full pipeline. The image buffer is only borrowed; nothing
/// in the returned score references it.
pub fn recognize(
    img: &GrayImage,
    classifiers: &Classifiers,
    cancel: &CancelToken,
) -> Result<Score, ScanError> {
    cancel.checkpoint("staves")?;
    let staves = staff::detect_staves(img)?;
    let systems = staff::group_systems(img, &staves);
    log::debug!("{} staves in {} systems", staves.len(), systems.len());

    cancel.checkpoint("layout")?;
    let clefs = clef::classify_clefs(img, &staves, &systems);
    let key_signature = signatures::read_key_signature(img, &staves, classifiers);
    let time_signature = signatures::detect_time_signature(img, &staves);
    let barlines = barlines::detect_barlines(img, &staves, &systems, &time_signature);
    let ledger_lines = staff::detect_ledger_lines(img, &staves);

    cancel.checkpoint("symbols")?;
    let mut heads = noteheads::detect_noteheads(img, &staves, &systems);
    noteheads::apply_confidence_gate(img, &staves, classifiers, &mut heads);
    accidentals::attach_accidentals(img, &staves, &mut heads);
    let rests = rests::detect_rests(img, &staves, &clefs, &heads);

    cancel.checkpoint("rhythm")?;
    rhythm::classify_durations(img, &staves, &mut heads);

    cancel.checkpoint("pitch")?;
    let notes = pitch::map_pitches(&staves, &clefs, &key_signature, &barlines, &heads);
    let notes = ties::collapse_ties(img, &staves, notes);

    cancel.checkpoint("assemble")?;
    let mut events: Vec<ScoreEvent> = notes.into_iter().map(ScoreEvent::Note).collect();
    events.extend(rests.into_iter().map(ScoreEvent::Rest));
    events.sort_by_key(|e| (e.staff_index(), e.x()));

    let total_notes = events.iter().filter(|e| !e.is_rest()).count();
    let total_rests = events.len() - total_notes;
    let mut score = Score {
        events,
        measures: Vec::new(),
        metadata: ScoreMetadata {
            image_width: img.width(),
            image_height: img.height(),
            staves,
            clefs,
            key_signature,
            time_signature,
            barlines,
            ledger_line_count: ledger_lines.len(),
            systems,
            total_notes,
            total_rests,
        },
        repeats_expanded: false,
    };

    measures::group_and_quantize(&mut score)?;
    repeats::expand_repeats(&mut score);
    score.sort_events();
    // Expansion renumbered the events; the measure index lists must
    // follow.
    measures::build_measures(&mut score);
    score.verify_invariants()?;
    Ok(score)
}

// ═══════════════════════════════════════════════════════════════════════
// Shared pixel probes
// ═══════════════════════════════════════════════════════════════════════

/// Whether row `y` lies within the pen thickness of a staff line.
/// Ink statistics exclude these rows so the lines themselves don't
/// read as part of a glyph; the tolerance widens with the spacing.
pub(crate) fn is_line_row(staff: &Staff, y: i64) -> bool {
    let halfwidth = if staff.spacing() >= 12.0 { 2 } else { 1 };
    staff
        .lines
        .iter()
        .any(|&ly| (y - ly as i64).abs() <= halfwidth)
}

/// Fraction of ink in a single column between two rows.
pub(crate) fn column_dark_fraction(img: &GrayImage, x: i64, y0: i64, y1: i64) -> f32 {
    let total = (y1 - y0).max(1);
    let mut dark = 0i64;
    for y in y0..y1 {
        if img.is_dark(x, y) {
            dark += 1;
        }
    }
    dark as f32 / total as f32
}

/// Length of the continuous vertical ink run through (x, y), allowing
/// up to `gap_tolerance` consecutive bright pixels.
pub(crate) fn vertical_run_length(img: &GrayImage, x: i64, y: i64, gap_tolerance: u32) -> u32 {
    if !img.is_dark(x, y) {
        return 0;
    }
    let mut len = 1u32;
    for dir in [-1i64, 1] {
        let mut gap = 0u32;
        let mut dy = 1i64;
        loop {
            let yy = y + dir * dy;
            if img.is_dark(x, yy) {
                len += 1 + gap;
                gap = 0;
            } else {
                gap += 1;
                if gap > gap_tolerance {
                    break;
                }
            }
            dy += 1;
        }
    }
    len
}

// ═══════════════════════════════════════════════════════════════════════
// Test scaffolding — a painter for synthetic sheet images
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod testutil {
    use crate::image::GrayImage;

    /// Draws synthetic engraving primitives onto a white page so stage
    /// tests can exercise the detectors on known geometry.
    pub struct SheetPainter {
        width: u32,
        height: u32,
        data: Vec<u8>,
    }

    impl SheetPainter {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                data: vec![255u8; (width * height) as usize],
            }
        }

        pub fn set(&mut self, x: i64, y: i64, luma: u8) {
            if x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64 {
                self.data[(y as u64 * self.width as u64 + x as u64) as usize] = luma;
            }
        }

        /// Five staff lines of 2 px thickness starting at `top`.
        pub fn staff(&mut self, top: u32, spacing: u32) {
            for line in 0..5u32 {
                self.hline(20, self.width as i64 - 20, (top + line * spacing) as i64, 2);
            }
        }

        pub fn hline(&mut self, x0: i64, x1: i64, y: i64, thickness: i64) {
            for yy in y..y + thickness {
                for x in x0..x1 {
                    self.set(x, yy, 0);
                }
            }
        }

        pub fn vline(&mut self, x: i64, y0: i64, y1: i64, thickness: i64) {
            for xx in x..x + thickness {
                for y in y0..y1 {
                    self.set(xx, y, 0);
                }
            }
        }

        pub fn rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64) {
            for y in y0..y1 {
                for x in x0..x1 {
                    self.set(x, y, 0);
                }
            }
        }

        /// Solid ellipse — a filled notehead or dot.
        pub fn filled_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32) {
            let (x0, x1) = ((cx - rx).floor() as i64, (cx + rx).ceil() as i64);
            let (y0, y1) = ((cy - ry).floor() as i64, (cy + ry).ceil() as i64);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let nx = (x as f32 - cx) / rx;
                    let ny = (y as f32 - cy) / ry;
                    if nx * nx + ny * ny <= 1.0 {
                        self.set(x, y, 0);
                    }
                }
            }
        }

        /// Elliptical ring — a hollow (half/whole) notehead.
        pub fn hollow_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32, hole_rx: f32, hole_ry: f32) {
            let (x0, x1) = ((cx - rx).floor() as i64, (cx + rx).ceil() as i64);
            let (y0, y1) = ((cy - ry).floor() as i64, (cy + ry).ceil() as i64);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let nx = (x as f32 - cx) / rx;
                    let ny = (y as f32 - cy) / ry;
                    let hx = (x as f32 - cx) / hole_rx;
                    let hy = (y as f32 - cy) / hole_ry;
                    if nx * nx + ny * ny <= 1.0 && hx * hx + hy * hy > 1.0 {
                        self.set(x, y, 0);
                    }
                }
            }
        }

        pub fn finish(self) -> GrayImage {
            GrayImage::from_raw(self.width, self.height, self.data)
        }
    }
}
