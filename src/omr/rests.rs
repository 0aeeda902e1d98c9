//! Rest detection: density windows slid through the gaps between
//! noteheads, classified by glyph shape. The thresholds are tuned and
//! deliberately carry no catch-all — a window that matches no shape is
//! dropped rather than guessed at.

use crate::image::GrayImage;
use crate::score::{Clef, Rest, RestKind, Staff, Voice};

use super::constants::*;
use super::HeadCandidate;

/// Find rests on all staves. Only the gaps between consecutive
/// detected noteheads are searched; a staff without heads contributes
/// nothing.
pub fn detect_rests(
    img: &GrayImage,
    staves: &[Staff],
    clefs: &[Clef],
    heads: &[HeadCandidate],
) -> Vec<Rest> {
    let mut rests = Vec::new();
    for (staff_index, staff) in staves.iter().enumerate() {
        let mut xs: Vec<u32> = heads
            .iter()
            .filter(|h| h.staff_index == staff_index)
            .map(|h| h.x)
            .collect();
        xs.sort_unstable();
        let voice = if clefs
            .get(staff_index)
            .copied()
            .unwrap_or(Clef::Treble)
            .is_treble_family()
        {
            Voice::Soprano
        } else {
            Voice::Bass
        };

        for pair in xs.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            if (right - left) as f32 > REST_GAP_MIN_S * staff.spacing() {
                scan_gap(img, staff, staff_index, voice, left, right, &mut rests);
            }
        }
    }
    rests.sort_by_key(|r| (r.staff_index, r.x));
    rests
}

fn scan_gap(
    img: &GrayImage,
    staff: &Staff,
    staff_index: usize,
    voice: Voice,
    left: u32,
    right: u32,
    out: &mut Vec<Rest>,
) {
    let s = staff.spacing();
    let win = (REST_WINDOW_W_S * s) as i64;
    let step = (REST_WINDOW_STEP_S * s).max(1.0) as i64;
    let top = staff.top() as i64;
    let bottom = staff.bottom() as i64;

    let mut x = left as i64 + s as i64;
    let scan_end = right as i64 - s as i64 - win;
    while x <= scan_end {
        // Raw window density, staff lines included.
        let density = img.region_density(x, top, x + win, bottom + 1);
        if !(REST_DENSITY_MIN..=REST_DENSITY_MAX).contains(&density) {
            x += step;
            continue;
        }
        // A barline-like column disqualifies the window.
        if max_column_run(img, x, x + win, top, bottom) as f32
            > REST_BARLINE_COVER * staff.height() as f32
        {
            x += step;
            continue;
        }

        if let Some(shape) = GapShape::gather(img, staff, x, x + win) {
            if let Some(kind) = classify_rest(staff, &shape) {
                let cx = ((shape.bx0 + shape.bx1) / 2) as u32;
                let already = out
                    .iter()
                    .any(|r| r.staff_index == staff_index && (r.x as i64 - cx as i64).abs() < win);
                if !already {
                    let dotted = has_dot(img, staff, shape.bx1);
                    out.push(Rest {
                        x: cx,
                        y: ((shape.by0 + shape.by1) / 2) as u32,
                        staff_index,
                        kind,
                        dotted,
                        voice,
                        repeated: false,
                    });
                }
                x = shape.bx1 + step;
                continue;
            }
        }
        x += step;
    }
}

/// Longest continuous vertical ink run of any column in the window.
fn max_column_run(img: &GrayImage, x0: i64, x1: i64, top: i64, bottom: i64) -> u32 {
    let mut best = 0u32;
    for x in x0..x1 {
        let mut run = 0u32;
        for y in top..=bottom {
            if img.is_dark(x, y) {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
    }
    best
}

/// Shape statistics of the ink inside one window, staff-line rows
/// excluded.
struct GapShape {
    bx0: i64,
    by0: i64,
    bx1: i64,
    by1: i64,
    density: f32,
    contour_changes: usize,
    bands: [f32; 5],
}

impl GapShape {
    fn gather(img: &GrayImage, staff: &Staff, x0: i64, x1: i64) -> Option<GapShape> {
        let s = staff.spacing();
        let masked = |y: i64| super::is_line_row(staff, y);
        let y0 = (staff.top() as f32 - 0.5 * s) as i64;
        let y1 = (staff.bottom() as f32 + 0.5 * s) as i64;

        let mut bbox: Option<(i64, i64, i64, i64)> = None;
        let mut row_counts: Vec<(i64, u32)> = Vec::new();
        for y in y0..=y1 {
            if masked(y) {
                continue;
            }
            let mut count = 0u32;
            for x in x0..x1 {
                if img.is_dark(x, y) {
                    count += 1;
                    bbox = Some(match bbox {
                        None => (x, y, x, y),
                        Some((bx0, by0, bx1, by1)) => {
                            (bx0.min(x), by0.min(y), bx1.max(x), by1.max(y))
                        }
                    });
                }
            }
            row_counts.push((y, count));
        }
        let (bx0, by0, bx1, by1) = bbox?;

        // Contour zigzag: sign changes in the row-count deltas.
        let mut contour_changes = 0usize;
        let mut last_delta = 0i64;
        let in_bbox: Vec<u32> = row_counts
            .iter()
            .filter(|(y, _)| *y >= by0 && *y <= by1)
            .map(|(_, c)| *c)
            .collect();
        for w in in_bbox.windows(2) {
            let delta = w[1] as i64 - w[0] as i64;
            if delta.abs() >= 2 {
                if last_delta != 0 && delta.signum() != last_delta.signum() {
                    contour_changes += 1;
                }
                last_delta = delta;
            }
        }

        // Five-band vertical density profile over the bbox.
        let mut bands = [0.0f32; 5];
        let mut band_totals = [0u32; 5];
        let mut band_dark = [0u32; 5];
        let h = (by1 - by0 + 1).max(1);
        for (y, count) in &row_counts {
            if *y < by0 || *y > by1 {
                continue;
            }
            let band = (((*y - by0) * 5) / h).min(4) as usize;
            band_totals[band] += (bx1 - bx0 + 1) as u32;
            band_dark[band] += count;
        }
        for i in 0..5 {
            if band_totals[i] > 0 {
                bands[i] = band_dark[i] as f32 / band_totals[i] as f32;
            }
        }

        let sampled: u32 = row_counts
            .iter()
            .filter(|(y, _)| *y >= by0 && *y <= by1)
            .map(|_| (bx1 - bx0 + 1) as u32)
            .sum();
        let dark: u32 = in_bbox.iter().sum();

        Some(GapShape {
            bx0,
            by0,
            bx1,
            by1,
            density: dark as f32 / sampled.max(1) as f32,
            contour_changes,
            bands,
        })
    }

    fn width(&self) -> f32 {
        (self.bx1 - self.bx0 + 1) as f32
    }

    fn height(&self) -> f32 {
        (self.by1 - self.by0 + 1) as f32
    }
}

/// Shape → rest kind decision table.
fn classify_rest(staff: &Staff, shape: &GapShape) -> Option<RestKind> {
    let s = staff.spacing();
    let w = shape.width();
    let h = shape.height();
    let line4 = staff.lines[3] as i64;
    let line3 = staff.lines[2] as i64;

    // Short wide block: whole hangs below line 4, half sits on line 3.
    if h < 0.9 * s && w > 0.5 * s && w / h > 1.2 {
        let top_offset = shape.by0 - line4;
        if (-2..=(0.75 * s) as i64).contains(&top_offset) {
            return Some(RestKind::Whole);
        }
        let bottom_offset = line3 - shape.by1;
        if (-2..=(0.75 * s) as i64).contains(&bottom_offset) {
            return Some(RestKind::Half);
        }
        return None;
    }

    // Tall zigzag: quarter.
    if h >= 1.8 * s && h <= 4.5 * s && shape.contour_changes >= 3 {
        return Some(RestKind::Quarter);
    }

    // Two stacked blobs: sixteenth. Checked before the eighth since a
    // sixteenth is also top-heavy.
    if h >= 0.8 * s && h <= 2.8 * s && shape.density > 0.15 && band_peaks(&shape.bands) >= 2 {
        return Some(RestKind::Sixteenth);
    }

    // One blob with a tail: eighth.
    if h >= 0.7 * s
        && h <= 2.2 * s
        && shape.density > 0.10
        && w < 1.5 * s
        && shape.bands[0] + shape.bands[1] > shape.bands[3] + shape.bands[4]
    {
        return Some(RestKind::Eighth);
    }

    None
}

/// Count rises above half the maximum band density.
fn band_peaks(bands: &[f32; 5]) -> usize {
    let max = bands.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return 0;
    }
    let threshold = 0.5 * max;
    let mut peaks = 0;
    let mut above = false;
    for &b in bands {
        if b >= threshold && !above {
            peaks += 1;
            above = true;
        } else if b < threshold {
            above = false;
        }
    }
    peaks
}

/// Augmentation dot: a dense little circle right of the glyph in the
/// space between lines 3 and 4.
fn has_dot(img: &GrayImage, staff: &Staff, glyph_right: i64) -> bool {
    let s = staff.spacing();
    let cy = (staff.lines[2] + staff.lines[3]) as i64 / 2;
    let r = (DOT_RADIUS_S * s).max(2.0) as i64;
    let mut dx = (0.5 * s) as i64;
    while dx <= (REST_DOT_SCAN_S * s) as i64 {
        let cx = glyph_right + dx;
        if img.region_density(cx - r, cy - r, cx + r + 1, cy + r + 1) > DOT_MIN_FILL {
            return true;
        }
        dx += 1;
    }
    false
}
