//! Neural classifier handles and inference glue.
//!
//! The three small networks (symbol OCR, key-signature type, key-signature
//! digit) are consumed as opaque callables injected by the host — the
//! crate never loads model files itself. Everything around the call is
//! here: patch cropping and resampling, input standardization, softmax,
//! entropy, and the curated class-label table the confidence gate reads.

use crate::image::GrayImage;
use crate::score::Duration;

/// An opaque model: flattened f32 input, raw logit/probability output.
pub type ModelFn = Box<dyn Fn(&[f32]) -> Vec<f32> + Send + Sync>;

/// Symbol OCR input is a 24×24 patch, 71 output classes.
pub const OCR_SIDE: u32 = 24;
pub const OCR_CLASSES: usize = 71;

/// Key-signature type input is 15 wide × 30 tall, 3 classes.
pub const KEY_TYPE_W: u32 = 15;
pub const KEY_TYPE_H: u32 = 30;

/// Key-signature digit input is 27 wide × 30 tall, 11 classes.
pub const KEY_DIGIT_W: u32 = 27;
pub const KEY_DIGIT_H: u32 = 30;

/// The classifier bundle handed to `process_sheet`. Any handle may be
/// absent; the stages that want it degrade per the error contract.
#[derive(Default)]
pub struct Classifiers {
    pub ocr: Option<ModelFn>,
    pub key_type: Option<ModelFn>,
    pub key_digit: Option<ModelFn>,
}

impl Classifiers {
    /// No models loaded: the OCR gate passes everything and the key
    /// signature reads as empty.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_ocr(mut self, model: ModelFn) -> Self {
        self.ocr = Some(model);
        self
    }

    pub fn with_key_type(mut self, model: ModelFn) -> Self {
        self.key_type = Some(model);
        self
    }

    pub fn with_key_digit(mut self, model: ModelFn) -> Self {
        self.key_digit = Some(model);
        self
    }
}

impl std::fmt::Debug for Classifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifiers")
            .field("ocr", &self.ocr.is_some())
            .field("key_type", &self.key_type.is_some())
            .field("key_digit", &self.key_digit.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OCR label table
// ═══════════════════════════════════════════════════════════════════════

/// Coarse symbol category the gate cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrCategory {
    Note,
    Rest,
    Unknown,
}

/// `(category, duration hint)` for each of the 71 OCR classes.
///
/// Curated from per-class sample counts on the training corpus; a
/// different corpus needs this table re-derived. Layout:
///   0..5    noteheads by duration (whole..32nd)
///   6..11   beamed/chorded notehead variants, same duration order
///   12..16  rests (whole..sixteenth)
///   17..21  rest variants with articulation overlap
///   22..70  non-event symbols: clefs, accidentals, digits, dots,
///           barlines, dynamics letters, text fragments, noise
const OCR_LABELS: [(OcrCategory, Option<Duration>); OCR_CLASSES] = {
    use OcrCategory::*;
    let mut table = [(Unknown, None); OCR_CLASSES];
    table[0] = (Note, Some(Duration::Whole));
    table[1] = (Note, Some(Duration::Half));
    table[2] = (Note, Some(Duration::Quarter));
    table[3] = (Note, Some(Duration::Eighth));
    table[4] = (Note, Some(Duration::Sixteenth));
    table[5] = (Note, Some(Duration::ThirtySecond));
    table[6] = (Note, Some(Duration::Whole));
    table[7] = (Note, Some(Duration::Half));
    table[8] = (Note, Some(Duration::Quarter));
    table[9] = (Note, Some(Duration::Eighth));
    table[10] = (Note, Some(Duration::Sixteenth));
    table[11] = (Note, Some(Duration::ThirtySecond));
    table[12] = (Rest, Some(Duration::Whole));
    table[13] = (Rest, Some(Duration::Half));
    table[14] = (Rest, Some(Duration::Quarter));
    table[15] = (Rest, Some(Duration::Eighth));
    table[16] = (Rest, Some(Duration::Sixteenth));
    table[17] = (Rest, Some(Duration::Quarter));
    table[18] = (Rest, Some(Duration::Eighth));
    table[19] = (Rest, Some(Duration::Half));
    table[20] = (Rest, Some(Duration::Whole));
    table[21] = (Rest, Some(Duration::Sixteenth));
    // 22..70 stay Unknown: clef glyphs, sharps/flats/naturals, time
    // signature digits, augmentation dots, barlines, dynamics, lyrics
    // fragments and plain noise.
    table
};

/// One OCR inference, post-processed.
#[derive(Debug, Clone, Copy)]
pub struct OcrReading {
    pub class: usize,
    pub category: OcrCategory,
    pub subtype: Option<Duration>,
    /// Top softmax probability.
    pub confidence: f32,
    /// Entropy of the softmax, normalized to [0, 1].
    pub entropy: f32,
}

/// Gate outcome for a notehead candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Keep { low_conf: bool },
    Reject,
}

impl OcrReading {
    /// Confidence-gate rules: a confident rest reading rejects the
    /// candidate, and so does a near-uniform (noise) distribution.
    pub fn gate(&self) -> GateDecision {
        if self.category == OcrCategory::Rest && self.confidence > 0.30 && self.entropy < 0.80 {
            return GateDecision::Reject;
        }
        if self.confidence <= 0.15 || self.entropy >= 0.92 {
            return GateDecision::Reject;
        }
        GateDecision::Keep { low_conf: self.confidence <= 0.10 }
    }
}

/// Run the OCR head over a raw output vector.
pub fn read_ocr_output(output: &[f32]) -> OcrReading {
    let probs = softmax(output);
    let (class, &confidence) = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, &0.0));
    let (category, subtype) = if class < OCR_LABELS.len() {
        OCR_LABELS[class]
    } else {
        (OcrCategory::Unknown, None)
    };
    OcrReading {
        class,
        category,
        subtype,
        confidence,
        entropy: normalized_entropy(&probs),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tensor math
// ═══════════════════════════════════════════════════════════════════════

/// Numerically stable softmax. An empty input returns an empty vec.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy of a distribution divided by `ln(n)`, so a uniform
/// distribution reads 1.0.
pub fn normalized_entropy(probs: &[f32]) -> f32 {
    if probs.len() < 2 {
        return 0.0;
    }
    let h: f32 = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();
    h / (probs.len() as f32).ln()
}

// ═══════════════════════════════════════════════════════════════════════
// Patch preparation
// ═══════════════════════════════════════════════════════════════════════

/// Bilinear resample of an image rectangle into a `w × h` float grid
/// (luma 0..255).
pub fn resample_region(
    img: &GrayImage,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    w: u32,
    h: u32,
) -> Vec<f32> {
    let mut out = Vec::with_capacity((w * h) as usize);
    let sx = (x1 - x0) / w as f32;
    let sy = (y1 - y0) / h as f32;
    for row in 0..h {
        for col in 0..w {
            let src_x = x0 + (col as f32 + 0.5) * sx - 0.5;
            let src_y = y0 + (row as f32 + 0.5) * sy - 0.5;
            let xf = src_x.floor();
            let yf = src_y.floor();
            let fx = src_x - xf;
            let fy = src_y - yf;
            let (xi, yi) = (xf as i64, yf as i64);
            let p00 = img.get(xi, yi) as f32;
            let p10 = img.get(xi + 1, yi) as f32;
            let p01 = img.get(xi, yi + 1) as f32;
            let p11 = img.get(xi + 1, yi + 1) as f32;
            let top = p00 + (p10 - p00) * fx;
            let bottom = p01 + (p11 - p01) * fx;
            out.push(top + (bottom - top) * fy);
        }
    }
    out
}

/// OCR patch prep: crop a square of `2 × half_size` around the center,
/// resample to 24×24, invert (ink becomes high), standardize to zero
/// mean and unit variance.
pub fn prepare_ocr_patch(img: &GrayImage, cx: f32, cy: f32, half_size: f32) -> Vec<f32> {
    let mut patch = resample_region(
        img,
        cx - half_size,
        cy - half_size,
        cx + half_size,
        cy + half_size,
        OCR_SIDE,
        OCR_SIDE,
    );
    for v in &mut patch {
        *v = 255.0 - *v;
    }
    standardize(&mut patch);
    patch
}

/// Key-signature crop prep: resample to the classifier's grid and scale
/// to 0..1 with ink high.
pub fn prepare_key_patch(
    img: &GrayImage,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    w: u32,
    h: u32,
) -> Vec<f32> {
    let mut patch = resample_region(img, x0, y0, x1, y1, w, h);
    for v in &mut patch {
        *v = (255.0 - *v) / 255.0;
    }
    patch
}

/// In-place zero-mean unit-variance normalization. A flat patch is left
/// at zero mean with unit spread untouched.
fn standardize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std = var.sqrt().max(1e-6);
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
}
