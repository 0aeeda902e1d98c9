//! Inline accidental classification: the region just left of each
//! notehead is scanned for sharp/flat/natural glyph signatures built
//! from stroke runs and sub-region densities.

use crate::image::GrayImage;
use crate::score::{Accidental, Staff};

use super::constants::*;
use super::HeadCandidate;

/// Dominance factor: one sub-region must beat another by this much to
/// count as "denser".
const DOMINANCE: f32 = 1.2;

/// Top/bottom halves may differ by at most the configured ratio to be
/// balanced (sharp, natural).
fn balanced(a: f32, b: f32, within: f32) -> bool {
    a.min(b) / a.max(b).max(1e-6) >= 1.0 - within
}

/// Attach an accidental to every head whose left-side region reads as
/// a glyph. Heads without a match keep `None`.
pub fn attach_accidentals(img: &GrayImage, staves: &[Staff], heads: &mut [HeadCandidate]) {
    for head in heads.iter_mut() {
        let staff = &staves[head.staff_index];
        head.accidental = classify_left_of(img, staff, head.x as f32, head.y as f32);
    }
}

fn classify_left_of(img: &GrayImage, staff: &Staff, x: f32, y: f32) -> Option<Accidental> {
    let s = staff.spacing();
    let note_radius = HEAD_ELLIPSE_HALF_W_S * s;
    let x0 = (x - ACC_SCAN_LEFT_S * s) as i64;
    let x1 = (x - note_radius - 1.0) as i64;
    let y0 = (y - ACC_SCAN_HALF_HEIGHT_S * s) as i64;
    let y1 = (y + ACC_SCAN_HALF_HEIGHT_S * s) as i64;
    if x1 <= x0 {
        return None;
    }

    let stats = GlyphStats::gather(img, staff, x0, y0, x1, y1)?;

    // Sharp: two verticals, a crossbar, dense and vertically balanced.
    if stats.vertical_runs >= 2
        && stats.max_h_run as f32 >= ACC_HRUN_MIN_S * s
        && stats.density > SHARP_MIN_DENSITY
        && balanced(stats.top_half, stats.bottom_half, SHARP_TB_BALANCE)
    {
        return Some(Accidental::Sharp);
    }

    // Natural: one or two verticals with short crossbars, balanced.
    // Checked before flat — a flat fails the balance test, a natural
    // can be bottom-heavy enough to pass the flat rules.
    if stats.density > NATURAL_MIN_DENSITY
        && stats.aspect > NATURAL_MIN_ASPECT
        && (1..=2).contains(&stats.vertical_runs)
        && stats.max_h_run as f32 >= NATURAL_HRUN_MIN_S * s
        && (stats.max_h_run as f32) < NATURAL_HRUN_MAX_S * s
        && balanced(stats.top_half, stats.bottom_half, SHARP_TB_BALANCE)
    {
        return Some(Accidental::Natural);
    }

    // Flat: tall, bottom-heavy, with the bulge in the lower right.
    if stats.density > FLAT_MIN_DENSITY
        && stats.aspect > FLAT_MIN_ASPECT
        && stats.bottom_two_thirds > stats.top_third * DOMINANCE
        && stats.lower_right > stats.lower_left * DOMINANCE
    {
        return Some(Accidental::Flat);
    }

    None
}

/// Run/density features of the candidate glyph region, computed over
/// the dark bounding box with staff-line rows excluded.
struct GlyphStats {
    density: f32,
    /// Height over width of the dark bounding box.
    aspect: f32,
    vertical_runs: usize,
    /// Longest horizontal run on any sampled row, in pixels.
    max_h_run: u32,
    top_half: f32,
    bottom_half: f32,
    top_third: f32,
    bottom_two_thirds: f32,
    lower_left: f32,
    lower_right: f32,
}

impl GlyphStats {
    fn gather(
        img: &GrayImage,
        staff: &Staff,
        x0: i64,
        y0: i64,
        x1: i64,
        y1: i64,
    ) -> Option<GlyphStats> {
        let s = staff.spacing();
        let masked = |py: i64| super::is_line_row(staff, py);

        // Dark bounding box over unmasked rows.
        let mut bbox: Option<(i64, i64, i64, i64)> = None;
        for py in y0..=y1 {
            if masked(py) {
                continue;
            }
            for px in x0..=x1 {
                if img.is_dark(px, py) {
                    bbox = Some(match bbox {
                        None => (px, py, px, py),
                        Some((bx0, by0, bx1, by1)) => {
                            (bx0.min(px), by0.min(py), bx1.max(px), by1.max(py))
                        }
                    });
                }
            }
        }
        let (bx0, by0, bx1, by1) = bbox?;
        let width = (bx1 - bx0 + 1) as f32;
        let height = (by1 - by0 + 1) as f32;
        let mid_y = (by0 + by1) / 2;
        let third_y = by0 + (by1 - by0) / 3;
        let mid_x = (bx0 + bx1) / 2;

        let mut sampled = 0u32;
        let mut dark = 0u32;
        let mut top_half = 0u32;
        let mut bottom_half = 0u32;
        let mut top_third = 0u32;
        let mut bottom_two_thirds = 0u32;
        let mut lower_left = 0u32;
        let mut lower_right = 0u32;
        let mut max_h_run = 0u32;

        for py in by0..=by1 {
            if masked(py) {
                continue;
            }
            let mut run = 0u32;
            for px in bx0..=bx1 {
                sampled += 1;
                if img.is_dark(px, py) {
                    dark += 1;
                    run += 1;
                    max_h_run = max_h_run.max(run);
                    if py <= mid_y {
                        top_half += 1;
                    } else {
                        bottom_half += 1;
                    }
                    if py <= third_y {
                        top_third += 1;
                    } else {
                        bottom_two_thirds += 1;
                    }
                    if py > mid_y {
                        if px <= mid_x {
                            lower_left += 1;
                        } else {
                            lower_right += 1;
                        }
                    }
                } else {
                    run = 0;
                }
            }
        }
        if sampled == 0 || dark == 0 {
            return None;
        }

        // Vertical stroke runs: qualifying columns clustered with a
        // small dedup distance.
        let min_v_run = (ACC_VRUN_MIN_S * s) as u32;
        let dedup = (ACC_VRUN_DEDUP_S * s).max(1.0) as i64;
        let mut vertical_runs = 0usize;
        let mut last_column: Option<i64> = None;
        for px in bx0..=bx1 {
            let mut len = 0u32;
            let mut best = 0u32;
            for py in by0..=by1 {
                // Masked rows continue a stroke that crosses a line.
                if img.is_dark(px, py) || masked(py) {
                    len += 1;
                    best = best.max(len);
                } else {
                    len = 0;
                }
            }
            if best >= min_v_run {
                if last_column.map_or(true, |last| px - last > dedup) {
                    vertical_runs += 1;
                }
                last_column = Some(px);
            }
        }

        Some(GlyphStats {
            density: dark as f32 / sampled as f32,
            aspect: height / width.max(1.0),
            vertical_runs,
            max_h_run,
            top_half: top_half as f32,
            bottom_half: bottom_half as f32,
            top_third: top_third as f32,
            bottom_two_thirds: bottom_two_thirds as f32,
            lower_left: lower_left as f32,
            lower_right: lower_right as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omr::staff::detect_staves;
    use crate::omr::testutil::SheetPainter;
    use crate::omr::HeadCandidate;

    /// A head at (400, 150) on the standard test staff; the accidental
    /// region is x ∈ [365, ~391], y ∈ [133, 167].
    fn run(page: SheetPainter) -> Option<Accidental> {
        let img = page.finish();
        let staves = detect_staves(&img).unwrap();
        let mut heads = vec![HeadCandidate::new(400, 150, 0, 1)];
        attach_accidentals(&img, &staves, &mut heads);
        heads[0].accidental
    }

    fn staff_page() -> SheetPainter {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page
    }

    #[test]
    fn plain_head_has_no_accidental() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        assert_eq!(run(page), None);
    }

    #[test]
    fn two_strokes_and_crossbars_read_as_sharp() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        // Sharp glyph: two verticals, two crossbars clear of the
        // masked staff-line rows.
        page.vline(374, 138, 162, 2);
        page.vline(382, 138, 162, 2);
        page.hline(370, 386, 147, 2);
        page.hline(370, 386, 152, 2);
        assert_eq!(run(page), Some(Accidental::Sharp));
    }

    #[test]
    fn stroke_with_lower_right_bulge_reads_as_flat() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        // Flat glyph: stem ending where the bulge starts, bulge low
        // and clearly right of the stem.
        page.vline(374, 133, 147, 2);
        page.filled_ellipse(381.0, 151.0, 4.0, 3.5);
        assert_eq!(run(page), Some(Accidental::Flat));
    }

    #[test]
    fn offset_strokes_with_short_bars_read_as_natural() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        // Natural glyph: offset verticals, short crossbars (< 0.5 s,
        // so the sharp rule cannot fire).
        page.vline(376, 136, 152, 2);
        page.vline(382, 148, 164, 2);
        page.hline(377, 383, 147, 2);
        page.hline(377, 383, 152, 2);
        assert_eq!(run(page), Some(Accidental::Natural));
    }
}
