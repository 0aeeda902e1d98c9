//! Image loader — decodes the photographed page into the single-channel
//! luma buffer the recognition stages scan.
//!
//! Decode (format sniffed from the bytes) → downscale to ≤1400 px width
//! → luma → auto-contrast stretch → small-angle deskew. The buffer is
//! immutable once handed to the pipeline.

use image::imageops::FilterType;

use crate::error::ScanError;

/// Width cap after rescaling. Staff geometry heuristics are tuned for
/// pages around this size; larger photos are downscaled, smaller ones
/// are never upscaled.
pub const MAX_WIDTH: u32 = 1400;

/// Luma threshold below which a pixel counts as ink.
pub const DARK_LUMA: u8 = 120;

/// Skew angles at or below this are left alone (degrees).
const SKEW_TOLERANCE_DEG: f32 = 0.15;

/// Rows sampled for skew estimation.
const SKEW_SAMPLE_ROWS: usize = 20;

/// Single-channel 8-bit image, origin top-left, row-major.
#[derive(Debug, Clone)]
pub struct GrayImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayImage {
    /// Wrap a raw luma buffer. `data.len()` must be `width × height`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Luma at (x, y). Out-of-bounds reads white, so scans never need
    /// edge guards.
    pub fn get(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 255;
        }
        self.data[(y as u64 * self.width as u64 + x as u64) as usize]
    }

    pub fn is_dark(&self, x: i64, y: i64) -> bool {
        self.get(x, y) < DARK_LUMA
    }

    /// Number of ink pixels on row `y`.
    pub fn row_dark_count(&self, y: u32) -> u32 {
        if y >= self.height {
            return 0;
        }
        let start = (y * self.width) as usize;
        self.data[start..start + self.width as usize]
            .iter()
            .filter(|&&p| p < DARK_LUMA)
            .count() as u32
    }

    /// Fraction of ink pixels inside a clipped rectangle.
    pub fn region_density(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> f32 {
        let mut dark = 0u32;
        let mut total = 0u32;
        for y in y0.max(0)..y1.min(self.height as i64) {
            for x in x0.max(0)..x1.min(self.width as i64) {
                total += 1;
                if self.is_dark(x, y) {
                    dark += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            dark as f32 / total as f32
        }
    }
}

/// Decode image bytes into the contrast-stretched, deskewed luma buffer.
pub fn load_image(bytes: &[u8], max_width: u32, deskew: bool) -> Result<GrayImage, ScanError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ScanError::ImageDecode(e.to_string()))?;

    let (w, h) = (decoded.width(), decoded.height());
    if w < 50 || h < 50 {
        return Err(ScanError::ImageTooSmall { width: w, height: h });
    }

    // Downscale only; small photos stay at native resolution.
    let decoded = if w > max_width {
        let new_h = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
        decoded.resize_exact(max_width, new_h, FilterType::Triangle)
    } else {
        decoded
    };

    let rgb = decoded.to_rgb8();
    let mut luma = Vec::with_capacity((rgb.width() * rgb.height()) as usize);
    for px in rgb.pixels() {
        let y = 0.299 * px.0[0] as f32 + 0.587 * px.0[1] as f32 + 0.114 * px.0[2] as f32;
        luma.push(y.round().clamp(0.0, 255.0) as u8);
    }
    let mut img = GrayImage::from_raw(rgb.width(), rgb.height(), luma);
    auto_contrast(&mut img);

    if deskew {
        let angle = estimate_skew_degrees(&img);
        if angle.abs() > SKEW_TOLERANCE_DEG {
            log::debug!("deskewing by {:.3}°", -angle);
            img = rotate_bilinear(&img, -angle);
            auto_contrast(&mut img);
        }
    }

    Ok(img)
}

/// Linear stretch of the luma range onto [0, 255].
fn auto_contrast(img: &mut GrayImage) {
    let (mut lo, mut hi) = (255u8, 0u8);
    for &p in &img.data {
        lo = lo.min(p);
        hi = hi.max(p);
    }
    if hi <= lo {
        return;
    }
    let span = (hi - lo) as f32;
    for p in &mut img.data {
        *p = (((*p - lo) as f32 / span) * 255.0).round() as u8;
    }
}

/// Estimate the page skew from staff-line candidate rows.
///
/// Samples equally spaced rows; a row with ≥30% ink is a candidate.
/// For each candidate the slope between its leftmost and rightmost ink
/// pixels (allowing the right end to sit a few rows off) yields one
/// angle sample; the estimate is the median.
pub fn estimate_skew_degrees(img: &GrayImage) -> f32 {
    let mut samples: Vec<f32> = Vec::new();
    let step = (img.height as usize / (SKEW_SAMPLE_ROWS + 1)).max(1);

    for i in 1..=SKEW_SAMPLE_ROWS {
        let y = (i * step) as u32;
        if y >= img.height {
            break;
        }
        if (img.row_dark_count(y) as f32) < 0.30 * img.width as f32 {
            continue;
        }

        let row_start = (y * img.width) as usize;
        let row = &img.data[row_start..row_start + img.width as usize];
        let left = match row.iter().position(|&p| p < DARK_LUMA) {
            Some(x) => x as i64,
            None => continue,
        };
        let right = match row.iter().rposition(|&p| p < DARK_LUMA) {
            Some(x) => x as i64,
            None => continue,
        };
        // Too short a run says nothing about the page angle.
        if right - left < img.width as i64 / 4 {
            continue;
        }

        // Where does the same line sit at the right end? Walk outward
        // from the sampled row until ink is found in that column.
        'column: for dy_abs in 0i64..=4 {
            for dy in [dy_abs, -dy_abs] {
                if img.is_dark(right, y as i64 + dy) {
                    samples.push((dy as f32).atan2((right - left) as f32).to_degrees());
                    break 'column;
                }
            }
        }
    }

    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    samples[samples.len() / 2]
}

/// Rotate around the image center, bilinear sampling, white fill.
fn rotate_bilinear(img: &GrayImage, degrees: f32) -> GrayImage {
    let (w, h) = (img.width, img.height);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();

    let mut out = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            // Inverse mapping: where in the source does this output
            // pixel come from?
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;

            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let p00 = img.get(x0, y0) as f32;
            let p10 = img.get(x0 + 1, y0) as f32;
            let p01 = img.get(x0, y0 + 1) as f32;
            let p11 = img.get(x0 + 1, y0 + 1) as f32;
            let top = p00 + (p10 - p00) * fx;
            let bottom = p01 + (p11 - p01) * fx;
            out.push((top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8);
        }
    }
    GrayImage::from_raw(w, h, out)
}
