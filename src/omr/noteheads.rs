//! Notehead detection: ellipse-fit candidates snapped to the staff
//! position grid, deduplicated, then filtered through the OCR
//! confidence gate.

use crate::classifiers::{prepare_ocr_patch, read_ocr_output, Classifiers, GateDecision};
use crate::image::GrayImage;
use crate::score::{Staff, System};

use super::constants::*;
use super::HeadCandidate;

/// Detect notehead candidates on every staff, ordered by
/// `(staff_index, x)`.
pub fn detect_noteheads(
    img: &GrayImage,
    staves: &[Staff],
    systems: &[System],
) -> Vec<HeadCandidate> {
    let mut heads = Vec::new();
    for (staff_index, staff) in staves.iter().enumerate() {
        detect_on_staff(img, staff, staff_index, staves, systems, &mut heads);
    }
    heads.sort_by_key(|h| (h.staff_index, h.x));
    heads
}

fn detect_on_staff(
    img: &GrayImage,
    staff: &Staff,
    staff_index: usize,
    staves: &[Staff],
    systems: &[System],
    out: &mut Vec<HeadCandidate>,
) {
    let s = staff.spacing();
    let (margin_top, margin_bottom) = scan_margins(staff_index, staves, systems);
    let y_start = (staff.top() as f32 - margin_top * s) as i64;
    let y_end = (staff.bottom() as f32 + margin_bottom * s) as i64;

    let mask = LineRowMask::new(staff);
    let half_w = HEAD_ELLIPSE_HALF_W_S * s;
    let half_h = HEAD_ELLIPSE_HALF_H_S * s;
    let dedup = HEAD_DEDUP_CHEBYSHEV_S * s;

    let mut accepted: Vec<(f32, f32)> = Vec::new();
    for y in y_start.max(0)..y_end.min(img.height() as i64) {
        for x in 0..img.width() as i64 {
            if img.get(x, y) >= HEAD_DARK_LUMA {
                continue;
            }
            if accepted
                .iter()
                .any(|&(ax, ay)| chebyshev(ax, ay, x as f32, y as f32) < dedup)
            {
                continue;
            }
            if let Some((cx, cy, position)) =
                evaluate_candidate(img, staff, &mask, x as f32, y as f32, half_w, half_h)
            {
                if accepted
                    .iter()
                    .any(|&(ax, ay)| chebyshev(ax, ay, cx, cy) < dedup)
                {
                    continue;
                }
                accepted.push((cx, cy));
                out.push(HeadCandidate::new(
                    cx.round() as u32,
                    cy.round() as u32,
                    staff_index,
                    position,
                ));
            }
        }
    }
}

/// Scan margins in spacings. The side of a paired staff that faces a
/// wide inter-staff gap is assumed to border lyrics and shrinks.
fn scan_margins(
    staff_index: usize,
    staves: &[Staff],
    systems: &[System],
) -> (f32, f32) {
    let mut top = HEAD_SCAN_MARGIN_S;
    let mut bottom = HEAD_SCAN_MARGIN_S;
    let staff = &staves[staff_index];
    let Some(system) = systems
        .iter()
        .find(|sys| sys.staff_indices.contains(&staff_index))
    else {
        return (top, bottom);
    };
    if system.staff_indices.len() < 2 {
        return (top, bottom);
    }
    let pos = system
        .staff_indices
        .iter()
        .position(|&i| i == staff_index)
        .unwrap_or(0);
    let lyrics_gap = LYRICS_GAP_S * staff.spacing();
    if pos > 0 {
        let above = &staves[system.staff_indices[pos - 1]];
        if (staff.top().saturating_sub(above.bottom()) as f32) > lyrics_gap {
            top = HEAD_SCAN_MARGIN_LYRICS_S;
        }
    }
    if pos + 1 < system.staff_indices.len() {
        let below = &staves[system.staff_indices[pos + 1]];
        if (below.top().saturating_sub(staff.bottom()) as f32) > lyrics_gap {
            bottom = HEAD_SCAN_MARGIN_LYRICS_S;
        }
    }
    (top, bottom)
}

/// Rows occupied by staff lines, excluded from fill statistics so the
/// lines themselves don't read as ink of the head.
struct LineRowMask {
    rows: Vec<(i64, i64)>,
}

impl LineRowMask {
    fn new(staff: &Staff) -> Self {
        let halfwidth = if staff.spacing() >= 12.0 { 2 } else { 1 };
        Self {
            rows: staff
                .lines
                .iter()
                .map(|&y| (y as i64 - halfwidth, y as i64 + halfwidth))
                .collect(),
        }
    }

    fn masked(&self, y: i64) -> bool {
        self.rows.iter().any(|&(lo, hi)| y >= lo && y <= hi)
    }
}

fn chebyshev(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    (ax - bx).abs().max((ay - by).abs())
}

/// Run the geometric acceptance tests for a candidate center. Returns
/// the dark centroid and snapped staff position on success.
fn evaluate_candidate(
    img: &GrayImage,
    staff: &Staff,
    mask: &LineRowMask,
    x: f32,
    y: f32,
    half_w: f32,
    half_h: f32,
) -> Option<(f32, f32, i32)> {
    let s = staff.spacing();
    let h = staff.half_space();

    // Ellipse fill, sampled off staff-line rows.
    let mut total = 0u32;
    let mut dark = 0u32;
    let mut sum_x = 0.0f32;
    let mut sum_y = 0.0f32;
    let mut left_dark = 0u32;
    let mut right_dark = 0u32;
    let mut bbox: Option<(i64, i64, i64, i64)> = None;

    let x0 = (x - half_w).floor() as i64;
    let x1 = (x + half_w).ceil() as i64;
    let y0 = (y - half_h).floor() as i64;
    let y1 = (y + half_h).ceil() as i64;
    for py in y0..=y1 {
        if mask.masked(py) {
            continue;
        }
        for px in x0..=x1 {
            let nx = (px as f32 - x) / half_w;
            let ny = (py as f32 - y) / half_h;
            if nx * nx + ny * ny > 1.0 {
                continue;
            }
            total += 1;
            if img.get(px, py) < HEAD_DARK_LUMA {
                dark += 1;
                sum_x += px as f32;
                sum_y += py as f32;
                if (px as f32) < x {
                    left_dark += 1;
                } else {
                    right_dark += 1;
                }
                bbox = Some(match bbox {
                    None => (px, py, px, py),
                    Some((bx0, by0, bx1, by1)) => {
                        (bx0.min(px), by0.min(py), bx1.max(px), by1.max(py))
                    }
                });
            }
        }
    }

    if total < HEAD_MIN_SAMPLES as u32 || (dark as f32 / total as f32) < HEAD_MIN_FILL {
        return None;
    }

    // Shape bounds.
    let (bx0, by0, bx1, by1) = bbox?;
    let bw = (bx1 - bx0 + 1) as f32;
    let bh = (by1 - by0 + 1) as f32;
    let aspect = bw / bh.max(1.0);
    if !(HEAD_ASPECT_MIN..=HEAD_ASPECT_MAX).contains(&aspect) {
        return None;
    }

    let cx = sum_x / dark as f32;
    let cy = sum_y / dark as f32;

    // Stem rejection: a long vertical run through the centroid means
    // the candidate sits on a stem or barline.
    let run = super::vertical_run_length(img, cx.round() as i64, cy.round() as i64, 1);
    if run as f32 > HEAD_MAX_VERTICAL_RUN_S * s {
        return None;
    }

    // Left/right symmetry.
    let lr = left_dark.min(right_dark) as f32 / left_dark.max(right_dark).max(1) as f32;
    if lr < HEAD_SYMMETRY_MIN {
        return None;
    }

    // Snap to the staff-position grid.
    let raw = (staff.bottom() as f32 - cy) / h;
    let position = raw.round() as i32;
    if (raw - position as f32).abs() >= HEAD_SNAP_MAX_ERROR {
        return None;
    }
    if !(HEAD_POSITION_MIN..=HEAD_POSITION_MAX).contains(&position) {
        return None;
    }

    Some((cx, cy, position))
}

// ═══════════════════════════════════════════════════════════════════════
// Confidence gate
// ═══════════════════════════════════════════════════════════════════════

/// Crop a patch around each candidate, run the OCR classifier, and drop
/// candidates the gate rejects. Without a model every candidate passes.
pub fn apply_confidence_gate(
    img: &GrayImage,
    staves: &[Staff],
    classifiers: &Classifiers,
    heads: &mut Vec<HeadCandidate>,
) {
    let Some(ocr) = &classifiers.ocr else {
        log::debug!("OCR classifier unavailable; confidence gate skipped");
        return;
    };

    heads.retain_mut(|head| {
        let s = staves[head.staff_index].spacing();
        let patch = prepare_ocr_patch(img, head.x as f32, head.y as f32, s);
        let reading = read_ocr_output(&ocr(&patch));
        match reading.gate() {
            GateDecision::Reject => false,
            GateDecision::Keep { low_conf } => {
                head.ocr = Some(reading);
                head.low_conf = low_conf;
                true
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::OCR_CLASSES;
    use crate::omr::staff::{detect_staves, group_systems};
    use crate::omr::testutil::SheetPainter;

    fn staff_page() -> SheetPainter {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page
    }

    fn run_detection(page: SheetPainter) -> (crate::image::GrayImage, Vec<Staff>, Vec<HeadCandidate>) {
        let img = page.finish();
        let staves = detect_staves(&img).unwrap();
        let systems = group_systems(&img, &staves);
        let heads = detect_noteheads(&img, &staves, &systems);
        (img, staves, heads)
    }

    #[test]
    fn filled_head_in_a_space_is_found_once() {
        let mut page = staff_page();
        // Space between the bottom two lines (position 1), y = 150.
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        let (_, _, heads) = run_detection(page);

        assert_eq!(heads.len(), 1, "got {heads:?}");
        assert_eq!(heads[0].position, 1);
        assert!((heads[0].x as i64 - 400).abs() <= 4);
    }

    #[test]
    fn hollow_head_is_still_detected() {
        let mut page = staff_page();
        page.hollow_ellipse(400.0, 136.0, 7.7, 5.6, 4.9, 3.1);
        let (_, _, heads) = run_detection(page);

        assert_eq!(heads.len(), 1, "got {heads:?}");
        assert_eq!(heads[0].position, 3);
    }

    #[test]
    fn head_on_a_line_snaps_to_even_position() {
        let mut page = staff_page();
        // Centered on the middle line (position 4), y = 129.
        page.filled_ellipse(500.0, 129.0, 7.5, 5.5);
        let (_, _, heads) = run_detection(page);

        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].position, 4);
    }

    #[test]
    fn blob_far_above_the_scan_region_is_ignored() {
        let mut page = staff_page();
        // Well past the +3-spacing scan margin above the staff.
        page.filled_ellipse(400.0, 40.0, 7.5, 5.5);
        let (_, _, heads) = run_detection(page);
        assert!(heads.is_empty(), "got {heads:?}");
    }

    #[test]
    fn thin_vertical_stroke_is_rejected() {
        let mut page = staff_page();
        page.vline(400, 110, 150, 2);
        let (_, _, heads) = run_detection(page);
        assert!(heads.is_empty(), "stem detected as head: {heads:?}");
    }

    #[test]
    fn two_heads_in_one_chord_both_survive_dedup() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5); // position 1
        page.filled_ellipse(400.0, 122.0, 7.5, 5.5); // position 5
        let (_, _, heads) = run_detection(page);

        assert_eq!(heads.len(), 2, "got {heads:?}");
        let mut positions: Vec<i32> = heads.iter().map(|head| head.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 5]);
    }

    #[test]
    fn gate_rejects_rest_readings_and_keeps_notes() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        let (img, staves, mut heads) = run_detection(page);
        assert_eq!(heads.len(), 1);

        // A classifier insisting the patch is a quarter rest.
        let reject_all = crate::Classifiers::none().with_ocr(Box::new(|_| {
            let mut out = vec![0.0; OCR_CLASSES];
            out[14] = 9.0;
            out
        }));
        apply_confidence_gate(&img, &staves, &reject_all, &mut heads);
        assert!(heads.is_empty());
    }

    #[test]
    fn gate_attaches_the_reading_on_keep() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        let (img, staves, mut heads) = run_detection(page);

        let keep_eighth = crate::Classifiers::none().with_ocr(Box::new(|_| {
            let mut out = vec![0.0; OCR_CLASSES];
            out[3] = 9.0;
            out
        }));
        apply_confidence_gate(&img, &staves, &keep_eighth, &mut heads);
        assert_eq!(heads.len(), 1);
        let reading = heads[0].ocr.expect("reading attached");
        assert_eq!(reading.subtype, Some(crate::score::Duration::Eighth));
        assert!(!heads[0].low_conf);
    }

    #[test]
    fn no_model_passes_everything() {
        let mut page = staff_page();
        page.filled_ellipse(400.0, 150.0, 7.5, 5.5);
        let (img, staves, mut heads) = run_detection(page);
        apply_confidence_gate(&img, &staves, &crate::Classifiers::none(), &mut heads);
        assert_eq!(heads.len(), 1);
        assert!(heads[0].ocr.is_none());
    }
}
