//! Key-signature reading (neural) and time-signature detection.
//!
//! The key signature is read by the two small classifiers: K1 decides
//! sharps/flats/none from a thumbnail of the post-clef region, K2 counts
//! the accidentals. The time signature is found classically: a window
//! where both staff halves carry digit-like ink, each half classified
//! by quadrant-density heuristics.

use crate::classifiers::{
    prepare_key_patch, Classifiers, KEY_DIGIT_H, KEY_DIGIT_W, KEY_TYPE_H, KEY_TYPE_W,
};
use crate::image::GrayImage;
use crate::score::{KeyKind, KeySignature, Staff, TimeSignature};

use super::constants::*;

// ═══════════════════════════════════════════════════════════════════════
// Key signature
// ═══════════════════════════════════════════════════════════════════════

/// Read the global key signature off the first staff. Missing models
/// degrade to an empty signature; that path is recorded but not fatal.
pub fn read_key_signature(
    img: &GrayImage,
    staves: &[Staff],
    classifiers: &Classifiers,
) -> KeySignature {
    let Some(staff) = staves.first() else {
        return KeySignature::none();
    };
    let (Some(key_type), Some(key_digit)) = (&classifiers.key_type, &classifiers.key_digit)
    else {
        log::debug!("key-signature classifiers unavailable; assuming no signature");
        return KeySignature::none();
    };

    let s = staff.spacing();
    let x0 = CLEF_REGION_FRACTION * img.width() as f32;
    let y0 = staff.top() as f32 - 0.5 * s;
    let y1 = staff.bottom() as f32 + 0.5 * s;
    let height = y1 - y0;

    // Crops preserve the classifiers' input aspect.
    let type_patch = prepare_key_patch(
        img,
        x0,
        y0,
        x0 + height * KEY_TYPE_W as f32 / KEY_TYPE_H as f32,
        y1,
        KEY_TYPE_W,
        KEY_TYPE_H,
    );
    let kind = match argmax(&key_type(&type_patch)) {
        1 => KeyKind::Sharps,
        2 => KeyKind::Flats,
        _ => return KeySignature::none(),
    };

    let digit_patch = prepare_key_patch(
        img,
        x0,
        y0,
        x0 + height * KEY_DIGIT_W as f32 / KEY_DIGIT_H as f32,
        y1,
        KEY_DIGIT_W,
        KEY_DIGIT_H,
    );
    let count = argmax(&key_digit(&digit_patch)).min(7) as u8;
    if count == 0 {
        return KeySignature::none();
    }
    KeySignature { kind, count }
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════
// Time signature
// ═══════════════════════════════════════════════════════════════════════

/// Scan the post-key region of the first staff for a stacked pair of
/// digits. Returns 4/4 with `end_x = 0` when nothing qualifies.
pub fn detect_time_signature(img: &GrayImage, staves: &[Staff]) -> TimeSignature {
    let Some(staff) = staves.first() else {
        return TimeSignature::common_time(0);
    };
    let s = staff.spacing();
    let win = (TIME_WINDOW_S * s) as i64;
    let scan_start = (TIME_SCAN_START_FRACTION * img.width() as f32) as i64;
    let scan_end = (TIME_SCAN_END_FRACTION * img.width() as f32) as i64;

    let top = staff.top() as i64;
    let mid = staff.lines[2] as i64;
    let bottom = staff.bottom() as i64;

    let mut x = scan_start;
    while x + win <= scan_end {
        let top_density = img.region_density(x, top, x + win, mid);
        let bottom_density = img.region_density(x, mid, x + win, bottom);
        let digit_like = |d: f32| (TIME_HALF_DENSITY_MIN..=TIME_HALF_DENSITY_MAX).contains(&d);
        if digit_like(top_density) && digit_like(bottom_density) {
            let numerator = classify_digit(&DigitFeatures::from_region(img, x, top, x + win, mid));
            let denominator =
                classify_digit(&DigitFeatures::from_region(img, x, mid, x + win, bottom));
            if let (Some(numerator), Some(denominator)) = (numerator, denominator) {
                return validate(numerator, denominator, (x + win) as u32);
            }
        }
        x += 2;
    }
    TimeSignature::common_time(0)
}

/// Snap an out-of-range reading to common time, as photographed digits
/// are unreliable enough that an illegal pair means a misread.
fn validate(numerator: u8, denominator: u8, end_x: u32) -> TimeSignature {
    let legal_denominator = matches!(denominator, 1 | 2 | 4 | 8 | 16);
    let legal_numerator = (1..=16).contains(&numerator);
    if !legal_denominator || !legal_numerator {
        log::warn!("time signature {numerator}/{denominator} out of range; snapping to 4/4");
        return TimeSignature::common_time(end_x);
    }
    let compound = numerator > 3 && numerator % 3 == 0 && denominator == 8;
    TimeSignature { beats: numerator, beat_type: denominator, compound, end_x }
}

// ═══════════════════════════════════════════════════════════════════════
// Digit heuristics
// ═══════════════════════════════════════════════════════════════════════

/// Quadrant-density features of one digit window.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct DigitFeatures {
    pub density: f32,
    pub top_left: f32,
    pub top_right: f32,
    pub bottom_left: f32,
    pub bottom_right: f32,
    /// Horizontal fill of the center row band.
    pub center_fill: f32,
    /// Horizontal fill of the bottom row band.
    pub bottom_fill: f32,
    /// Ink bounding-box width relative to the window width.
    pub relative_width: f32,
}

impl DigitFeatures {
    pub(super) fn from_region(img: &GrayImage, x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        // Tighten to the ink bounding box so margins don't dilute the
        // quadrant ratios.
        let mut bx0 = x1;
        let mut bx1 = x0;
        let mut by0 = y1;
        let mut by1 = y0;
        for y in y0..y1 {
            for x in x0..x1 {
                if img.is_dark(x, y) {
                    bx0 = bx0.min(x);
                    bx1 = bx1.max(x + 1);
                    by0 = by0.min(y);
                    by1 = by1.max(y + 1);
                }
            }
        }
        if bx0 >= bx1 || by0 >= by1 {
            return Self::default();
        }

        let mx = (bx0 + bx1) / 2;
        let my = (by0 + by1) / 2;
        let band = ((by1 - by0) / 6).max(1);
        Self {
            density: img.region_density(bx0, by0, bx1, by1),
            top_left: img.region_density(bx0, by0, mx, my),
            top_right: img.region_density(mx, by0, bx1, my),
            bottom_left: img.region_density(bx0, my, mx, by1),
            bottom_right: img.region_density(mx, my, bx1, by1),
            center_fill: img.region_density(bx0, my - band / 2, bx1, my + band.max(2) / 2 + 1),
            bottom_fill: img.region_density(bx0, by1 - band, bx1, by1),
            relative_width: (bx1 - bx0) as f32 / (x1 - x0).max(1) as f32,
        }
    }

    fn top(&self) -> f32 {
        self.top_left + self.top_right
    }

    fn bottom(&self) -> f32 {
        self.bottom_left + self.bottom_right
    }

    fn left(&self) -> f32 {
        self.top_left + self.bottom_left
    }

    fn right(&self) -> f32 {
        self.top_right + self.bottom_right
    }
}

/// Single-digit classification by quadrant shape. `None` means the ink
/// does not read as any digit; the caller treats the window as a false
/// positive.
pub(super) fn classify_digit(f: &DigitFeatures) -> Option<u8> {
    if f.density <= 0.0 {
        return None;
    }
    // A bare vertical stroke: narrow box, solid ink.
    if f.relative_width < 0.45 && f.density > 0.30 {
        return Some(1);
    }
    // Strong crossbar through the middle: 4.
    if f.center_fill > 0.60 && f.right() >= f.left() {
        return Some(4);
    }
    // Dense and balanced in every direction: 8.
    if f.density > 0.48
        && ratio(f.top(), f.bottom()) > 0.8
        && ratio(f.left(), f.right()) > 0.8
    {
        return Some(8);
    }
    // Bottom-heavy: 2 carries a solid base bar, 6 a bottom loop.
    if f.bottom() > f.top() * 1.25 {
        return Some(if f.bottom_fill > 0.55 { 2 } else { 6 });
    }
    // Top-heavy loop: 9.
    if f.top() > f.bottom() * 1.25 {
        return Some(9);
    }
    // Right-leaning double bump: 3.
    if f.right() > f.left() * 1.2 {
        return Some(3);
    }
    None
}

fn ratio(a: f32, b: f32) -> f32 {
    if a.max(b) <= 0.0 {
        1.0
    } else {
        a.min(b) / a.max(b)
    }
}
