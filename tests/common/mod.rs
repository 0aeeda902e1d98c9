//! Shared helpers for the integration tests: a painter that engraves
//! synthetic pages and encodes them for the pipeline, plus a WAV
//! sample decoder.

use image::{Rgb, RgbImage};

/// Draws engraving primitives onto a white page and encodes the result
/// as PNG bytes for `process_sheet`.
pub struct PagePainter {
    img: RgbImage,
}

#[allow(dead_code)]
impl PagePainter {
    pub fn new(width: u32, height: u32) -> Self {
        Self { img: RgbImage::from_pixel(width, height, Rgb([255, 255, 255])) }
    }

    fn set(&mut self, x: i64, y: i64) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, Rgb([0, 0, 0]));
        }
    }

    /// Five staff lines of 2 px thickness starting at `top`. The
    /// detector reports each line at its run midpoint, one pixel below
    /// `top`.
    pub fn staff(&mut self, top: i64, spacing: i64) {
        let width = self.img.width() as i64;
        for line in 0..5 {
            self.hline(20, width - 20, top + line * spacing, 2);
        }
    }

    pub fn hline(&mut self, x0: i64, x1: i64, y: i64, thickness: i64) {
        for yy in y..y + thickness {
            for x in x0..x1 {
                self.set(x, yy);
            }
        }
    }

    pub fn vline(&mut self, x: i64, y0: i64, y1: i64, thickness: i64) {
        for xx in x..x + thickness {
            for y in y0..y1 {
                self.set(xx, y);
            }
        }
    }

    /// Solid notehead.
    pub fn filled_head(&mut self, cx: f32, cy: f32) {
        self.filled_ellipse(cx, cy, 7.5, 5.5);
    }

    /// Hollow (half/whole) notehead.
    pub fn hollow_head(&mut self, cx: f32, cy: f32) {
        self.ellipse_ring(cx, cy, 7.7, 5.6, 4.9, 3.1);
    }

    /// Up-stem on the right side of a head, reaching three spacings.
    pub fn stem_up(&mut self, head_x: i64, head_y: i64) {
        self.vline(head_x + 6, head_y - 42, head_y + 1, 2);
    }

    pub fn filled_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32) {
        for y in (cy - ry).floor() as i64..=(cy + ry).ceil() as i64 {
            for x in (cx - rx).floor() as i64..=(cx + rx).ceil() as i64 {
                let nx = (x as f32 - cx) / rx;
                let ny = (y as f32 - cy) / ry;
                if nx * nx + ny * ny <= 1.0 {
                    self.set(x, y);
                }
            }
        }
    }

    pub fn ellipse_ring(&mut self, cx: f32, cy: f32, rx: f32, ry: f32, hole_rx: f32, hole_ry: f32) {
        for y in (cy - ry).floor() as i64..=(cy + ry).ceil() as i64 {
            for x in (cx - rx).floor() as i64..=(cx + rx).ceil() as i64 {
                let nx = (x as f32 - cx) / rx;
                let ny = (y as f32 - cy) / ry;
                let hx = (x as f32 - cx) / hole_rx;
                let hy = (y as f32 - cy) / hole_ry;
                if nx * nx + ny * ny <= 1.0 && hx * hx + hy * hy > 1.0 {
                    self.set(x, y);
                }
            }
        }
    }

    pub fn to_png(&self) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        self.img
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("PNG encode");
        buf.into_inner()
    }
}

/// Decode the i16 samples from canonical WAV bytes.
#[allow(dead_code)]
pub fn wav_samples(wav: &[u8]) -> Vec<i16> {
    assert!(wav.len() >= 44, "WAV shorter than its header");
    wav[44..]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
