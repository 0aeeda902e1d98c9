//! Staff detection: horizontal line runs, grouping into 5-line staves,
//! pairing staves into systems, and ledger-line discovery.

use crate::error::ScanError;
use crate::image::GrayImage;
use crate::score::{Staff, System};

use super::constants::*;
use super::column_dark_fraction;

/// A short horizontal ink run above or below a staff, carrying an
/// out-of-staff note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLine {
    pub staff_index: usize,
    pub x0: u32,
    pub x1: u32,
    pub y: u32,
}

// ═══════════════════════════════════════════════════════════════════════
// Staff lines and staves
// ═══════════════════════════════════════════════════════════════════════

/// Find individual staff-line y coordinates: contiguous dark-row runs
/// no thicker than a pen stroke, reported at their midpoint.
pub fn detect_staff_lines(img: &GrayImage) -> Vec<u32> {
    let min_dark = (ROW_DARK_FRACTION * img.width() as f32) as u32;
    let mut lines = Vec::new();
    let mut run_start: Option<u32> = None;

    for y in 0..=img.height() {
        let dark = y < img.height() && img.row_dark_count(y) >= min_dark.max(1);
        match (dark, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                let thickness = y - start;
                if thickness <= MAX_LINE_THICKNESS {
                    lines.push(start + thickness / 2);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    lines
}

/// Group detected lines into 5-line staves. Lines separated by more
/// than `STAFF_GAP_FACTOR ×` the median gap start a new staff; partial
/// groups are dropped.
pub fn group_staves(lines: &[u32]) -> Vec<Staff> {
    if lines.len() < 5 {
        return Vec::new();
    }

    let mut gaps: Vec<u32> = lines.windows(2).map(|w| w[1] - w[0]).collect();
    gaps.sort_unstable();
    let median_gap = gaps[gaps.len() / 2].max(1);
    let break_gap = STAFF_GAP_FACTOR * median_gap as f32;

    let mut staves = Vec::new();
    let mut group: Vec<u32> = Vec::new();
    for &line in lines {
        if let Some(&last) = group.last() {
            if (line - last) as f32 > break_gap {
                // Partial groups at a break are noise (text underline,
                // beam) and are dropped.
                group.clear();
            }
        }
        group.push(line);
        if group.len() == 5 {
            staves.push(to_staff(&group));
            group.clear();
        }
    }
    staves
}

fn to_staff(lines: &[u32]) -> Staff {
    Staff { lines: [lines[0], lines[1], lines[2], lines[3], lines[4]] }
}

/// Full staff pass: lines → staves, failing when the page yields none.
pub fn detect_staves(img: &GrayImage) -> Result<Vec<Staff>, ScanError> {
    let staves = group_staves(&detect_staff_lines(img));
    if staves.is_empty() {
        return Err(ScanError::NoStavesDetected);
    }
    Ok(staves)
}

// ═══════════════════════════════════════════════════════════════════════
// System pairing
// ═══════════════════════════════════════════════════════════════════════

/// Pair adjacent staves into systems. Two staves join when they sit
/// close together, or when a brace / systemic barline bridges the gap
/// in the leftmost slice of the page — the latter catches grand staves
/// with a band of lyrics between the staves.
pub fn group_systems(img: &GrayImage, staves: &[Staff]) -> Vec<System> {
    let mut systems: Vec<System> = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for i in 0..staves.len() {
        if current.is_empty() {
            current.push(i);
        }
        let joined = i + 1 < staves.len() && staves_joined(img, &staves[i], &staves[i + 1]);
        if joined {
            current.push(i + 1);
        } else {
            systems.push(make_system(staves, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        systems.push(make_system(staves, current));
    }
    systems
}

fn make_system(staves: &[Staff], staff_indices: Vec<usize>) -> System {
    let top = staff_indices.iter().map(|&i| staves[i].top()).min().unwrap_or(0);
    let bottom = staff_indices
        .iter()
        .map(|&i| staves[i].bottom())
        .max()
        .unwrap_or(0);
    System { top, bottom, staff_indices }
}

fn staves_joined(img: &GrayImage, upper: &Staff, lower: &Staff) -> bool {
    let gap = lower.top().saturating_sub(upper.bottom());
    if (gap as f32) < PAIR_GAP_FACTOR * upper.height() as f32 {
        return true;
    }
    has_brace_column(img, upper, lower) || has_shared_barline_column(img, upper, lower)
}

/// A brace or systemic barline: some column in the leftmost slice with
/// a near-continuous ink run spanning most of the inter-staff gap.
fn has_brace_column(img: &GrayImage, upper: &Staff, lower: &Staff) -> bool {
    let region_w = (BRACE_REGION_FRACTION * img.width() as f32) as i64;
    let y0 = upper.bottom() as i64;
    let y1 = lower.top() as i64;
    let gap = (y1 - y0).max(1);
    let bridgeable = (BRACE_BRIDGE_FRACTION * gap as f32) as i64;

    for x in 0..region_w {
        let mut covered = 0i64;
        let mut hole = 0i64;
        let mut broken = false;
        for y in y0..y1 {
            if img.is_dark(x, y) {
                covered += 1;
                hole = 0;
            } else {
                hole += 1;
                if hole > bridgeable {
                    broken = true;
                    break;
                }
            }
        }
        if !broken && covered as f32 >= BRACE_COVER_FRACTION * gap as f32 {
            return true;
        }
    }
    false
}

/// Both staves carry a dense barline-like column at the same x in the
/// left slice — another systemic-barline signature.
fn has_shared_barline_column(img: &GrayImage, upper: &Staff, lower: &Staff) -> bool {
    let region_w = (BRACE_REGION_FRACTION * img.width() as f32) as i64;
    for x in 0..region_w {
        let upper_cover =
            column_dark_fraction(img, x, upper.top() as i64, upper.bottom() as i64);
        let lower_cover =
            column_dark_fraction(img, x, lower.top() as i64, lower.bottom() as i64);
        if upper_cover >= BARLINE_COLUMN_FRACTION && lower_cover >= BARLINE_COLUMN_FRACTION {
            return true;
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════
// Ledger lines
// ═══════════════════════════════════════════════════════════════════════

/// Short horizontal runs on half-space intervals above and below each
/// staff, up to `LEDGER_RANGE_SPACINGS` out.
pub fn detect_ledger_lines(img: &GrayImage, staves: &[Staff]) -> Vec<LedgerLine> {
    let mut out = Vec::new();
    for (staff_index, staff) in staves.iter().enumerate() {
        let s = staff.spacing();
        let h = staff.half_space();
        for k in 1..=(LEDGER_RANGE_SPACINGS * 2) {
            let above = staff.top() as f32 - k as f32 * h;
            let below = staff.bottom() as f32 + k as f32 * h;
            for y in [above, below] {
                if y < 0.0 || y >= img.height() as f32 {
                    continue;
                }
                collect_ledger_runs(img, staff_index, y.round() as u32, s, &mut out);
            }
        }
    }
    out
}

fn collect_ledger_runs(
    img: &GrayImage,
    staff_index: usize,
    y: u32,
    spacing: f32,
    out: &mut Vec<LedgerLine>,
) {
    let min_len = (LEDGER_MIN_LEN_S * spacing) as i64;
    let max_len = (LEDGER_MAX_LEN_S * spacing) as i64;
    let mut run_start: Option<i64> = None;

    for x in 0..=(img.width() as i64) {
        let dark = x < img.width() as i64 && img.is_dark(x, y as i64);
        match (dark, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                let len = x - start;
                let mid = (start + x) / 2;
                if len >= min_len && len <= max_len && thin_enough(img, mid, y) {
                    out.push(LedgerLine {
                        staff_index,
                        x0: start as u32,
                        x1: (x - 1) as u32,
                        y,
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }
}

/// A ledger line is a pen stroke, not a notehead: its vertical extent
/// at the run midpoint stays small.
fn thin_enough(img: &GrayImage, x: i64, y: u32) -> bool {
    let mut thickness = 1u32;
    let mut dy = 1i64;
    while img.is_dark(x, y as i64 - dy) {
        thickness += 1;
        dy += 1;
    }
    dy = 1;
    while img.is_dark(x, y as i64 + dy) {
        thickness += 1;
        dy += 1;
    }
    thickness <= LEDGER_MAX_THICKNESS
}
