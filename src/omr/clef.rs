//! Clef classification from dark-pixel statistics in the leftmost
//! slice of each staff.

use crate::image::GrayImage;
use crate::score::{Clef, Staff, System};

use super::constants::*;

/// Minimum ink a row needs (in the clef slice) to count toward the
/// glyph's vertical extent.
const ROW_MIN_PIXELS: u32 = 2;

/// Density a small window must reach to count as a bass-clef dot.
const DOT_REGION_DENSITY: f32 = 0.25;

/// Upper/lower halves of a C-clef glyph may differ by at most this
/// ratio to count as symmetric.
const C_CLEF_BALANCE: f32 = 0.35;

/// Classify one clef per staff, in staff order.
pub fn classify_clefs(img: &GrayImage, staves: &[Staff], systems: &[System]) -> Vec<Clef> {
    staves
        .iter()
        .enumerate()
        .map(|(i, staff)| {
            classify_staff_clef(img, staff)
                .unwrap_or_else(|| fallback_clef(i, systems))
        })
        .collect()
}

/// Per-row ink counts and the aggregate blob statistics the rules read.
struct ClefStats {
    /// First and last rows with ink (glyph vertical extent).
    min_y: i64,
    max_y: i64,
    /// Ink above/below the staff's vertical midpoint.
    upper: u32,
    lower: u32,
    /// Dark-weighted center-of-mass row.
    center_of_mass: f32,
    region_x1: i64,
}

fn gather_stats(img: &GrayImage, staff: &Staff) -> Option<ClefStats> {
    let s = staff.spacing();
    let region_x1 = (CLEF_REGION_FRACTION * img.width() as f32) as i64;
    let scan_top = staff.top() as i64 - (2.5 * s) as i64;
    let scan_bottom = staff.bottom() as i64 + (2.5 * s) as i64;
    let mid = (staff.top() + staff.bottom()) as f32 / 2.0;

    let mut min_y = i64::MAX;
    let mut max_y = i64::MIN;
    let mut upper = 0u32;
    let mut lower = 0u32;
    let mut weighted_y = 0.0f64;
    let mut total = 0u64;

    for y in scan_top..=scan_bottom {
        let mut row_count = 0u32;
        for x in 0..region_x1 {
            if img.is_dark(x, y) {
                row_count += 1;
            }
        }
        if row_count < ROW_MIN_PIXELS {
            continue;
        }
        min_y = min_y.min(y);
        max_y = max_y.max(y);
        if (y as f32) < mid {
            upper += row_count;
        } else {
            lower += row_count;
        }
        weighted_y += y as f64 * row_count as f64;
        total += row_count as u64;
    }

    if total == 0 {
        return None;
    }
    Some(ClefStats {
        min_y,
        max_y,
        upper,
        lower,
        center_of_mass: (weighted_y / total as f64) as f32,
        region_x1,
    })
}

fn classify_staff_clef(img: &GrayImage, staff: &Staff) -> Option<Clef> {
    let stats = gather_stats(img, staff)?;
    let s = staff.spacing();
    let extent = (stats.max_y - stats.min_y) as f32;
    let above = staff.top() as f32 - stats.min_y as f32;
    let below = stats.max_y as f32 - staff.bottom() as f32;

    // Treble: a tall glyph spilling over both outer lines.
    if above >= TREBLE_ABOVE_S * s && below >= TREBLE_BELOW_S * s && extent > TREBLE_MIN_EXTENT_S * s
    {
        return Some(Clef::Treble);
    }

    // Bass: top-heavy body plus the two dots flanking the middle line.
    if stats.upper > stats.lower
        && extent <= BASS_MAX_EXTENT_S * s
        && has_flanking_dots(img, staff, stats.region_x1)
    {
        return Some(Clef::Bass);
    }

    // C-clefs: symmetric, mid-sized, centered on a staff line.
    let balance = stats.upper.min(stats.lower) as f32 / stats.upper.max(stats.lower).max(1) as f32;
    if balance >= 1.0 - C_CLEF_BALANCE
        && extent >= C_CLEF_MIN_EXTENT_S * s
        && extent <= C_CLEF_MAX_EXTENT_S * s
    {
        if let Some(line) = snapped_center_line(img, staff, &stats) {
            return Some(match line {
                1 => Clef::Soprano,
                4 => Clef::Tenor,
                _ => Clef::Alto,
            });
        }
    }

    None
}

/// Bass-clef dots: dense little regions in the two spaces flanking the
/// middle line, toward the right of the clef slice.
fn has_flanking_dots(img: &GrayImage, staff: &Staff, region_x1: i64) -> bool {
    let s = staff.spacing();
    let win = (0.6 * s).max(2.0) as i64;
    let space_above = (staff.lines[1] + staff.lines[2]) as i64 / 2;
    let space_below = (staff.lines[2] + staff.lines[3]) as i64 / 2;

    let mut found_above = false;
    let mut found_below = false;
    for x in region_x1 / 2..region_x1 {
        let half = win / 2;
        if !found_above
            && img.region_density(x - half, space_above - half, x + half, space_above + half)
                >= DOT_REGION_DENSITY
        {
            found_above = true;
        }
        if !found_below
            && img.region_density(x - half, space_below - half, x + half, space_below + half)
                >= DOT_REGION_DENSITY
        {
            found_below = true;
        }
    }
    found_above && found_below
}

/// Snap the glyph's center of mass to the nearest staff line (1-based
/// from the top) if the band around that line is dense enough.
fn snapped_center_line(img: &GrayImage, staff: &Staff, stats: &ClefStats) -> Option<u32> {
    let s = staff.spacing();
    let (line_idx, line_y) = staff
        .lines
        .iter()
        .enumerate()
        .min_by_key(|(_, &ly)| (ly as f32 - stats.center_of_mass).abs() as u32)?;

    let band = (C_CLEF_BAND_S * s) as i64;
    let density = img.region_density(
        0,
        *line_y as i64 - band,
        stats.region_x1,
        *line_y as i64 + band,
    );
    if density > C_CLEF_BAND_DENSITY {
        Some(line_idx as u32 + 1)
    } else {
        None
    }
}

/// No glyph recognized: decide by the staff's role in its system.
fn fallback_clef(staff_index: usize, systems: &[System]) -> Clef {
    for system in systems {
        if system.staff_indices.len() == 2 {
            if system.staff_indices[0] == staff_index {
                return Clef::Treble;
            }
            if system.staff_indices[1] == staff_index {
                return Clef::Bass;
            }
        }
    }
    Clef::Treble
}
