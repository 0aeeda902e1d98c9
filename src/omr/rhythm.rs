//! Duration classification: stem scan, beam/flag counting, head-fill
//! voting, the OCR override, and the final decision table, plus
//! augmentation dots.

use crate::classifiers::OcrCategory;
use crate::image::GrayImage;
use crate::score::{Duration, Staff};

use super::constants::*;
use super::HeadCandidate;

/// Fill in `duration`, `dotted` and `stem_dir` for every candidate.
pub fn classify_durations(img: &GrayImage, staves: &[Staff], heads: &mut [HeadCandidate]) {
    for head in heads.iter_mut() {
        let staff = &staves[head.staff_index];
        classify_one(img, staff, head);
    }
}

fn classify_one(img: &GrayImage, staff: &Staff, head: &mut HeadCandidate) {
    let stem = scan_stem(img, staff, head);
    head.stem_dir = if stem.has_stem { stem.dir } else { 0 };

    let mut beam_count = if stem.has_stem {
        let beams = count_beams(img, staff, &stem);
        if beams > 0 {
            beams
        } else {
            count_flags(img, staff, head, &stem)
        }
    } else {
        0
    };

    let votes = fill_votes(img, staff, head);
    let mut filled = votes >= 2 || beam_count > 0;

    // OCR override: a split vote defers to the classifier; a confident
    // short-note reading recovers beams the scan missed.
    if let Some(reading) = head.ocr {
        if reading.category == OcrCategory::Note {
            if let Some(subtype) = reading.subtype {
                if (1..=2).contains(&votes) && beam_count == 0 {
                    filled = !matches!(subtype, Duration::Whole | Duration::Half);
                }
                if beam_count == 0 {
                    beam_count = match subtype {
                        Duration::Eighth => 1,
                        Duration::Sixteenth => 2,
                        Duration::ThirtySecond => 3,
                        _ => 0,
                    };
                    if beam_count > 0 {
                        filled = true;
                    }
                }
            }
        }
    }

    head.duration = match (stem.has_stem, filled, beam_count) {
        (false, false, _) => Duration::Whole,
        (false, true, _) => Duration::Quarter,
        (true, false, _) => Duration::Half,
        (true, true, 0) => Duration::Quarter,
        (true, true, 1) => Duration::Eighth,
        (true, true, 2) => Duration::Sixteenth,
        (true, true, _) => Duration::ThirtySecond,
    };

    head.dotted = has_augmentation_dot(img, staff, head);
}

// ═══════════════════════════════════════════════════════════════════════
// Stems
// ═══════════════════════════════════════════════════════════════════════

struct StemInfo {
    has_stem: bool,
    /// -1 stem up, +1 stem down.
    dir: i8,
    x: i64,
    tip_y: i64,
}

/// Probe columns at small offsets either side of the head center for
/// the longest continuous vertical ink run.
fn scan_stem(img: &GrayImage, staff: &Staff, head: &HeadCandidate) -> StemInfo {
    let s = staff.spacing();
    let min_offset = (STEM_PROBE_MIN_S * s) as i64;
    let max_offset = (STEM_PROBE_MAX_S * s) as i64;
    let cx = head.x as i64;
    let cy = head.y as i64;

    let mut best = StemInfo { has_stem: false, dir: 0, x: cx, tip_y: cy };
    let mut best_len = 0u32;
    for offset in min_offset..=max_offset {
        for side in [-1i64, 1] {
            let x = cx + side * offset;
            let up = directional_run(img, x, cy, -1, STEM_GAP_TOLERANCE);
            let down = directional_run(img, x, cy, 1, STEM_GAP_TOLERANCE);
            if up > best_len {
                best_len = up;
                best = StemInfo { has_stem: false, dir: -1, x, tip_y: cy - up as i64 };
            }
            if down > best_len {
                best_len = down;
                best = StemInfo { has_stem: false, dir: 1, x, tip_y: cy + down as i64 };
            }
        }
    }
    best.has_stem = best_len as f32 > STEM_MIN_LENGTH_S * s;
    best
}

/// Length of the ink run from (x, y) in direction `dir`, bridging up
/// to `gap_tolerance` bright pixels.
fn directional_run(img: &GrayImage, x: i64, y: i64, dir: i64, gap_tolerance: u32) -> u32 {
    let mut len = 0u32;
    let mut gap = 0u32;
    let mut dy = 0i64;
    loop {
        if img.is_dark(x, y + dir * dy) {
            len = dy as u32 + 1;
            gap = 0;
        } else {
            gap += 1;
            if gap > gap_tolerance {
                break;
            }
        }
        dy += 1;
    }
    len
}

// ═══════════════════════════════════════════════════════════════════════
// Beams and flags
// ═══════════════════════════════════════════════════════════════════════

/// Count full beams at the stem tip, extended by partial-beam hooks at
/// deeper levels.
fn count_beams(img: &GrayImage, staff: &Staff, stem: &StemInfo) -> u32 {
    let s = staff.spacing();
    let inward = -(stem.dir as i64); // from the tip back toward the head
    let full_run = BEAM_MIN_RUN_S * s;
    let hook_min = BEAM_HOOK_MIN_S * s;
    let hook_max = BEAM_HOOK_MAX_S * s;

    let mut runs = [0.0f32; 3];
    for (level, run) in runs.iter_mut().enumerate() {
        let level_y = stem.tip_y + inward * (level as f32 * BEAM_LEVEL_STEP_S * s) as i64;
        *run = beam_run_at(img, staff, stem.x, level_y).max(beam_run_at(
            img,
            staff,
            stem.x,
            level_y + inward,
        ));
    }

    let mut full = 0u32;
    while (full as usize) < 3 && runs[full as usize] > full_run {
        full += 1;
    }
    if full == 0 {
        return 0;
    }
    let mut extra = 0u32;
    for &run in runs.iter().skip(full as usize) {
        if run >= hook_min && run <= hook_max {
            extra += 1;
        }
    }
    full + extra
}

/// Longest horizontal run leaving the stem on either side, where a
/// column counts as ink if any row of the ±0.25 s band is dark. Staff
/// lines are themselves page-wide horizontal runs, so their rows are
/// excluded from the band.
fn beam_run_at(img: &GrayImage, staff: &Staff, stem_x: i64, level_y: i64) -> f32 {
    let band = (BEAM_BAND_S * staff.spacing()) as i64;
    let column_dark = |x: i64| {
        (-band..=band)
            .any(|dy| !super::is_line_row(staff, level_y + dy) && img.is_dark(x, level_y + dy))
    };

    let mut best = 0u32;
    for side in [-1i64, 1] {
        let mut run = 0u32;
        let mut gap = 0u32;
        let mut dx = 1i64;
        loop {
            if column_dark(stem_x + side * dx) {
                run = dx as u32;
                gap = 0;
            } else {
                gap += 1;
                if gap > STEM_GAP_TOLERANCE {
                    break;
                }
            }
            dx += 1;
        }
        best = best.max(run);
    }
    best as f32
}

/// Unbeamed short notes carry flags: filled zones on the far side of
/// the stem, starting at the tip and stepping inward. Staff-line rows
/// are excluded from the fill so in-staff stem tips don't read the
/// lines as flags.
fn count_flags(img: &GrayImage, staff: &Staff, head: &HeadCandidate, stem: &StemInfo) -> u32 {
    let s = staff.spacing();
    let zone_w = (FLAG_ZONE_W_S * s) as i64;
    let zone_h = (FLAG_ZONE_H_S * s) as i64;
    let inward = -(stem.dir as i64);
    // Side of the stem away from the head.
    let side = if stem.x >= head.x as i64 { 1i64 } else { -1 };

    let mut flags = 0u32;
    for zone in 0..3i64 {
        let y0 = stem.tip_y + inward * zone * zone_h;
        let y1 = y0 + inward * zone_h;
        let (y_lo, y_hi) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        let (x_lo, x_hi) = if side > 0 {
            (stem.x + 1, stem.x + 1 + zone_w)
        } else {
            (stem.x - zone_w, stem.x)
        };

        let mut total = 0u32;
        let mut dark = 0u32;
        for y in y_lo..y_hi {
            if super::is_line_row(staff, y) {
                continue;
            }
            for x in x_lo..x_hi {
                total += 1;
                if img.is_dark(x, y) {
                    dark += 1;
                }
            }
        }
        if total > 0 && dark as f32 / total as f32 >= FLAG_MIN_FILL {
            flags += 1;
        }
    }
    flags
}

// ═══════════════════════════════════════════════════════════════════════
// Head fill
// ═══════════════════════════════════════════════════════════════════════

/// Three fill strategies vote on whether the head is solid; rows under
/// staff lines are excluded everywhere.
fn fill_votes(img: &GrayImage, staff: &Staff, head: &HeadCandidate) -> u32 {
    let s = staff.spacing();
    let r = 0.5 * s;
    let cx = head.x as i64;
    let cy = head.y as i64;

    let density_of = |points: &mut dyn Iterator<Item = (i64, i64)>| -> f32 {
        let mut total = 0u32;
        let mut dark = 0u32;
        for (x, y) in points {
            if super::is_line_row(staff, y) {
                continue;
            }
            total += 1;
            if img.is_dark(x, y) {
                dark += 1;
            }
        }
        if total == 0 {
            0.0
        } else {
            dark as f32 / total as f32
        }
    };

    let mut votes = 0u32;

    // Inner rectangle of half-radius 0.5 r.
    let half = (0.5 * r) as i64;
    let mut rect = (cy - half..=cy + half)
        .flat_map(|y| (cx - half..=cx + half).map(move |x| (x, y)));
    if density_of(&mut rect) > FILL_RECT_DENSITY {
        votes += 1;
    }

    // Cross through the center of radius 0.7 r.
    let arm = (0.7 * r) as i64;
    let mut cross = (cx - arm..=cx + arm)
        .map(|x| (x, cy))
        .chain((cy - arm..=cy + arm).map(|y| (cx, y)));
    if density_of(&mut cross) > FILL_CROSS_DENSITY {
        votes += 1;
    }

    // 3×3 patch at the centroid.
    let mut patch = (cy - 1..=cy + 1).flat_map(|y| (cx - 1..=cx + 1).map(move |x| (x, y)));
    if density_of(&mut patch) > FILL_PATCH_DENSITY {
        votes += 1;
    }

    votes
}

// ═══════════════════════════════════════════════════════════════════════
// Augmentation dots
// ═══════════════════════════════════════════════════════════════════════

/// A dense little circle to the right of the head, snapped to the
/// nearest space row.
fn has_augmentation_dot(img: &GrayImage, staff: &Staff, head: &HeadCandidate) -> bool {
    let s = staff.spacing();
    let h = staff.half_space();
    // Dots never sit on a line: a head on a line looks to the space
    // above it.
    let dot_y = if head.position % 2 == 0 {
        head.y as f32 - h
    } else {
        head.y as f32
    } as i64;

    let r = (DOT_RADIUS_S * s).max(2.0) as i64;
    let mut dx = (DOT_SCAN_MIN_S * s) as i64;
    let end = (DOT_SCAN_MAX_S * s) as i64;
    while dx <= end {
        let cx = head.x as i64 + dx;
        if img.region_density(cx - r, dot_y - r, cx + r + 1, dot_y + r + 1) > DOT_MIN_FILL {
            return true;
        }
        dx += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::{read_ocr_output, OCR_CLASSES};
    use crate::omr::staff::detect_staves;
    use crate::omr::testutil::SheetPainter;
    use crate::omr::HeadCandidate;

    fn staff_page() -> SheetPainter {
        let mut page = SheetPainter::new(1000, 400);
        page.staff(150, 14);
        page
    }

    /// Head centered in the space at (400, 200) — position 1 on the
    /// staff whose detected lines are 151..207.
    fn head() -> HeadCandidate {
        HeadCandidate::new(400, 200, 0, 1)
    }

    fn classify(page: SheetPainter, candidate: HeadCandidate) -> HeadCandidate {
        let img = page.finish();
        let staves = detect_staves(&img).unwrap();
        let mut heads = vec![candidate];
        classify_durations(&img, &staves, &mut heads);
        heads.pop().unwrap()
    }

    #[test]
    fn hollow_head_without_stem_is_whole() {
        let mut page = staff_page();
        page.hollow_ellipse(400.0, 200.0, 7.7, 5.6, 4.9, 3.1);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Whole);
        assert_eq!(head.stem_dir, 0);
        assert!(!head.dotted);
    }

    #[test]
    fn hollow_head_with_stem_is_half() {
        let mut page = staff_page();
        page.hollow_ellipse(400.0, 200.0, 7.7, 5.6, 4.9, 3.1);
        page.vline(406, 158, 201, 2);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Half);
        assert_eq!(head.stem_dir, -1);
    }

    #[test]
    fn filled_head_with_stem_is_quarter() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(406, 158, 201, 2);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Quarter);
        assert_eq!(head.stem_dir, -1);
    }

    #[test]
    fn filled_head_without_stem_is_quarter() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Quarter);
        assert_eq!(head.stem_dir, 0);
    }

    #[test]
    fn one_beam_makes_an_eighth() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(406, 158, 201, 2);
        // Beam leaving the stem tip to the right. Thin enough that it
        // stays out of the next level's scan band.
        page.hline(408, 422, 158, 2);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Eighth);
    }

    #[test]
    fn two_beams_make_a_sixteenth() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(406, 158, 201, 2);
        page.hline(408, 422, 158, 2);
        page.hline(408, 422, 160, 2);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Sixteenth);
    }

    #[test]
    fn flag_zone_makes_an_eighth() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(406, 158, 201, 2);
        // A solid flag blob beside the tip, too short to read as a beam.
        page.rect(408, 158, 413, 172);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Eighth);
    }

    #[test]
    fn down_stem_reports_positive_direction() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(393, 200, 243, 2);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Quarter);
        assert_eq!(head.stem_dir, 1);
    }

    #[test]
    fn dot_beside_the_head_marks_it_dotted() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.filled_ellipse(414.0, 200.0, 3.5, 3.5);
        let head = classify(page, head());
        assert_eq!(head.duration, Duration::Quarter);
        assert!(head.dotted);
    }

    #[test]
    fn ocr_subtype_recovers_missing_beams() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 200.0, 7.5, 5.5);
        page.vline(406, 158, 201, 2);
        let mut candidate = head();
        let mut logits = vec![0.0f32; OCR_CLASSES];
        logits[4] = 9.0; // sixteenth-note class
        candidate.ocr = Some(read_ocr_output(&logits));
        let head = classify(page, candidate);
        assert_eq!(head.duration, Duration::Sixteenth);
    }
}
