//! Barline detection: dense full-height columns past the clef/key/time
//! prefix, classified into single/double/final/repeat forms, then
//! filtered by cross-staff consensus inside each system.

use crate::image::GrayImage;
use crate::score::{Barline, BarlineKind, Staff, System, TimeSignature};

use super::constants::*;
use super::column_dark_fraction;

/// Density a probe window needs to count as a notehead-like blob next
/// to a candidate column (which then reads as a stem, not a barline).
const BLOB_DENSITY: f32 = 0.45;

/// Density a small box needs to count as a repeat dot.
const REPEAT_DOT_DENSITY: f32 = 0.40;

/// One contiguous run of dense columns on one staff.
#[derive(Debug, Clone, Copy)]
struct Stroke {
    x0: u32,
    x1: u32,
}

impl Stroke {
    fn mid(&self) -> u32 {
        (self.x0 + self.x1) / 2
    }

    fn thickness(&self) -> u32 {
        self.x1 - self.x0 + 1
    }
}

/// Detect classified barlines for every staff.
pub fn detect_barlines(
    img: &GrayImage,
    staves: &[Staff],
    systems: &[System],
    time: &TimeSignature,
) -> Vec<Barline> {
    let prefix_end = ((BARLINE_REGION_FRACTION * img.width() as f32) as u32).max(time.end_x);

    let strokes: Vec<Vec<Stroke>> = staves
        .iter()
        .map(|staff| find_strokes(img, staff, prefix_end))
        .collect();

    let mut barlines = Vec::new();
    for (staff_index, staff) in staves.iter().enumerate() {
        let classified = classify_staff(img, staff, staff_index, &strokes[staff_index]);
        let agreed: Vec<Barline> = classified
            .into_iter()
            .filter(|bar| has_consensus(bar, staff_index, staves, systems, &strokes))
            .collect();
        barlines.extend(enforce_measure_width(staff, agreed));
    }
    barlines
}

/// Dense full-height columns, excluding wide strokes and stems.
fn find_strokes(img: &GrayImage, staff: &Staff, prefix_end: u32) -> Vec<Stroke> {
    let top = staff.top() as i64;
    let bottom = staff.bottom() as i64 + 1;

    let mut strokes: Vec<Stroke> = Vec::new();
    let mut run_start: Option<u32> = None;
    for x in (prefix_end + 1)..img.width() {
        let qualifies = column_dark_fraction(img, x as i64, top, bottom) >= BARLINE_COLUMN_FRACTION
            && !wide_stroke(img, x as i64, top, bottom)
            && !notehead_blob_nearby(img, staff, x as i64);
        match (qualifies, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                strokes.push(Stroke { x0: start, x1: x - 1 });
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        strokes.push(Stroke { x0: start, x1: img.width() - 1 });
    }
    strokes
}

/// Both columns 3 px out dense means the stroke is wider than any
/// barline pen — a beam crossing the staff or a dark region.
fn wide_stroke(img: &GrayImage, x: i64, top: i64, bottom: i64) -> bool {
    column_dark_fraction(img, x - 3, top, bottom) >= BARLINE_COLUMN_FRACTION
        && column_dark_fraction(img, x + 3, top, bottom) >= BARLINE_COLUMN_FRACTION
}

/// A stem shows a notehead above, below, or beside the column at about
/// one spacing out; a barline does not.
fn notehead_blob_nearby(img: &GrayImage, staff: &Staff, x: i64) -> bool {
    let s = staff.spacing();
    let half_w = (0.55 * s) as i64;
    let half_h = (0.40 * s) as i64;
    let probe = |cx: i64, cy: i64| {
        img.region_density(cx - half_w, cy - half_h, cx + half_w, cy + half_h) >= BLOB_DENSITY
    };

    // Beside: every line and space level of the staff. Heads sit with
    // their center between roughly half and one spacing off the stem,
    // so probe both offsets.
    let h = staff.half_space();
    for k in 0..=8 {
        let cy = (staff.bottom() as f32 - k as f32 * h) as i64;
        for offset in [(0.6 * s) as i64, s as i64] {
            if probe(x - offset, cy) || probe(x + offset, cy) {
                return true;
            }
        }
    }
    // Above and below the staff, where high/low stems end in a head.
    probe(x, (staff.top() as f32 - s) as i64) || probe(x, (staff.bottom() as f32 + s) as i64)
}

/// Pair neighboring strokes into double/final barlines, find repeat
/// dots, and keep `BARLINE_MIN_SEPARATION_S` between results.
fn classify_staff(
    img: &GrayImage,
    staff: &Staff,
    staff_index: usize,
    strokes: &[Stroke],
) -> Vec<Barline> {
    let s = staff.spacing();
    let mut out: Vec<Barline> = Vec::new();
    let mut i = 0usize;
    while i < strokes.len() {
        let stroke = strokes[i];
        let mut kind = BarlineKind::Single;
        let mut right_edge = stroke.x1;

        if i + 1 < strokes.len() {
            let next = strokes[i + 1];
            let gap = next.x0.saturating_sub(stroke.x1 + 1);
            if (DOUBLE_BAR_MIN_DX..=DOUBLE_BAR_MAX_DX).contains(&gap) {
                kind = if next.thickness() >= FINAL_BAR_MIN_THICKNESS {
                    BarlineKind::Final
                } else {
                    BarlineKind::Double
                };
                right_edge = next.x1;
                i += 1;
            }
        }

        let dots_left = has_repeat_dots(img, staff, stroke.x0 as i64, -1);
        let dots_right = has_repeat_dots(img, staff, right_edge as i64, 1);
        kind = match (dots_left, dots_right) {
            (true, true) => BarlineKind::RepeatBoth,
            (true, false) => BarlineKind::RepeatEnd,
            (false, true) => BarlineKind::RepeatStart,
            (false, false) => kind,
        };

        let x = stroke.mid();
        let far_enough = out
            .last()
            .map_or(true, |prev: &Barline| (x - prev.x) as f32 >= BARLINE_MIN_SEPARATION_S * s);
        if far_enough {
            out.push(Barline { x, staff_index, kind });
        }
        i += 1;
    }
    out
}

/// Repeat dots sit in the two spaces flanking the middle line, within
/// half a spacing of the barline edge.
fn has_repeat_dots(img: &GrayImage, staff: &Staff, edge_x: i64, side: i64) -> bool {
    let s = staff.spacing();
    let h = staff.half_space();
    let cx = edge_x + side * (h * 0.5 + 1.0) as i64 + side;
    let r = (0.45 * s / 2.0).max(1.5) as i64;
    let upper_space = (staff.lines[1] + staff.lines[2]) as i64 / 2;
    let lower_space = (staff.lines[2] + staff.lines[3]) as i64 / 2;
    let dense = |cy: i64| {
        img.region_density(cx - r, cy - r, cx + r + 1, cy + r + 1) >= REPEAT_DOT_DENSITY
    };
    dense(upper_space) && dense(lower_space)
}

/// In a multi-staff system every member staff must show a candidate at
/// the same x (±1 spacing) for a barline to be real.
fn has_consensus(
    bar: &Barline,
    staff_index: usize,
    staves: &[Staff],
    systems: &[System],
    strokes: &[Vec<Stroke>],
) -> bool {
    let Some(system) = systems.iter().find(|sys| sys.staff_indices.contains(&staff_index))
    else {
        return true;
    };
    if system.staff_indices.len() < 2 {
        return true;
    }
    let tolerance = staves[staff_index].spacing();
    system.staff_indices.iter().all(|&other| {
        other == staff_index
            || strokes[other]
                .iter()
                .any(|stroke| (stroke.mid() as f32 - bar.x as f32).abs() <= tolerance)
    })
}

/// Drop barlines that would make a measure narrower than plausible.
fn enforce_measure_width(staff: &Staff, mut bars: Vec<Barline>) -> Vec<Barline> {
    let min_width = MIN_MEASURE_WIDTH_S * staff.spacing();
    bars.sort_by_key(|b| b.x);
    let mut out: Vec<Barline> = Vec::new();
    for bar in bars {
        if out
            .last()
            .map_or(true, |prev| (bar.x - prev.x) as f32 >= min_width)
        {
            out.push(bar);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omr::staff::{detect_staves, group_systems};
    use crate::omr::testutil::SheetPainter;

    fn detect(page: SheetPainter) -> (Vec<Barline>, Vec<Staff>) {
        let img = page.finish();
        let staves = detect_staves(&img).unwrap();
        let systems = group_systems(&img, &staves);
        let time = TimeSignature::common_time(0);
        (detect_barlines(&img, &staves, &systems, &time), staves)
    }

    #[test]
    fn single_barlines_split_the_staff() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page.vline(400, 100, 157, 2);
        page.vline(700, 100, 157, 2);
        let (bars, _) = detect(page);

        assert_eq!(bars.len(), 2, "expected two barlines, got {bars:?}");
        assert!(bars.iter().all(|b| b.kind == BarlineKind::Single));
        assert!((bars[0].x as i64 - 400).abs() <= 2);
        assert!((bars[1].x as i64 - 700).abs() <= 2);
    }

    #[test]
    fn adjacent_thin_strokes_read_as_double() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page.vline(500, 100, 157, 2);
        page.vline(505, 100, 157, 2);
        let (bars, _) = detect(page);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].kind, BarlineKind::Double);
    }

    #[test]
    fn thick_second_stroke_reads_as_final() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page.vline(500, 100, 157, 2);
        page.vline(506, 100, 157, 4);
        let (bars, _) = detect(page);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].kind, BarlineKind::Final);
    }

    #[test]
    fn dots_on_the_left_mark_a_repeat_end() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page.vline(600, 100, 157, 2);
        // Dots in the two middle spaces, just left of the stroke.
        page.filled_ellipse(594.0, 121.0, 3.0, 3.0);
        page.filled_ellipse(594.0, 135.0, 3.0, 3.0);
        let (bars, _) = detect(page);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].kind, BarlineKind::RepeatEnd);
    }

    #[test]
    fn dots_on_the_right_mark_a_repeat_start() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        page.vline(300, 100, 157, 2);
        page.filled_ellipse(307.0, 121.0, 3.0, 3.0);
        page.filled_ellipse(307.0, 135.0, 3.0, 3.0);
        let (bars, _) = detect(page);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].kind, BarlineKind::RepeatStart);
    }

    #[test]
    fn stem_with_notehead_is_not_a_barline() {
        let mut page = SheetPainter::new(1000, 300);
        page.staff(100, 14);
        // A stem spanning the staff with a filled head beside its foot.
        page.vline(500, 100, 157, 2);
        page.filled_ellipse(493.0, 149.0, 7.5, 5.5);
        let (bars, _) = detect(page);

        assert!(bars.is_empty(), "stem read as barline: {bars:?}");
    }

    #[test]
    fn grand_staff_requires_consensus() {
        let mut page = SheetPainter::new(1000, 600);
        page.staff(100, 14);
        page.staff(300, 14);
        // Full barline through both staves at 500; top-only stroke at 700.
        page.vline(500, 100, 157, 2);
        page.vline(500, 300, 357, 2);
        page.vline(700, 100, 157, 2);
        let (bars, _) = detect(page);

        let xs: Vec<(usize, u32)> = bars.iter().map(|b| (b.staff_index, b.x)).collect();
        assert!(
            bars.iter().all(|b| (b.x as i64 - 500).abs() <= 2),
            "unagreed barline survived: {xs:?}"
        );
        assert_eq!(bars.len(), 2, "one barline per staff: {xs:?}");
    }
}
