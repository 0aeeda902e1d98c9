//! sheetscan — optical music recognition and audio rendering engine.
//!
//! Takes a single photo of printed sheet music and produces a symbolic
//! score, then renders that score as PCM audio with a cursor timing
//! map for playback highlighting.
//!
//! # Example
//! ```no_run
//! use sheetscan::{process_sheet_file, render_audio, Classifiers, RenderOptions};
//!
//! let score = process_sheet_file("path/to/page.jpg", &Classifiers::none()).unwrap();
//! println!("Notes: {}", score.metadata.total_notes);
//!
//! let audio = render_audio(&score, &RenderOptions::default(), None).unwrap();
//! std::fs::write("out.wav", &audio.wav).unwrap();
//! ```

pub mod audio;
pub mod cancel;
pub mod classifiers;
pub mod error;
pub mod image;
pub mod omr;
pub mod score;
pub mod sf2;
pub mod synth;

#[cfg(target_os = "android")]
pub mod android;

use std::path::Path;

pub use audio::{
    render_audio, timing_map_to_json, CursorEntry, RenderOptions, RenderedAudio, VoiceMask,
};
pub use cancel::CancelToken;
pub use classifiers::Classifiers;
pub use error::ScanError;
pub use omr::expand_repeats;
pub use score::*;
pub use sf2::{parse_soundfont, SoundFont};

/// Recommended wall-clock limit for one recognition pass.
pub const DEFAULT_OMR_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(45);

/// Knobs for the recognition pipeline.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Images wider than this are downscaled before analysis.
    pub max_width: u32,
    /// Estimate and correct small page skew.
    pub deskew: bool,
    /// Deadline applied on top of the caller's cancellation token.
    pub timeout: Option<std::time::Duration>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_width: image::MAX_WIDTH,
            deskew: true,
            timeout: Some(DEFAULT_OMR_TIMEOUT),
        }
    }
}

/// Recognize a score from encoded image bytes (format sniffed from the
/// bytes; JPEG and PNG are supported).
pub fn process_sheet(image_bytes: &[u8], classifiers: &Classifiers) -> Result<Score, ScanError> {
    process_sheet_with(
        image_bytes,
        classifiers,
        &ProcessOptions::default(),
        &CancelToken::new(),
    )
}

/// Recognize a score with explicit options and cancellation.
pub fn process_sheet_with(
    image_bytes: &[u8],
    classifiers: &Classifiers,
    options: &ProcessOptions,
    cancel: &CancelToken,
) -> Result<Score, ScanError> {
    let token = match options.timeout {
        Some(timeout) => cancel.limited(timeout),
        None => cancel.clone(),
    };
    token.checkpoint("decode")?;
    let img = image::load_image(image_bytes, options.max_width, options.deskew)?;
    omr::recognize(&img, classifiers, &token)
}

/// Recognize a score from an image file on disk.
pub fn process_sheet_file<P: AsRef<Path>>(
    path: P,
    classifiers: &Classifiers,
) -> Result<Score, ScanError> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| ScanError::ImageDecode(format!("failed to read '{}': {e}", path.display())))?;
    process_sheet(&data, classifiers)
}

/// Parse a SoundFont-2 bank from raw bytes.
pub fn load_soundfont(sf2_bytes: &[u8]) -> Result<SoundFont, ScanError> {
    sf2::parse_soundfont(sf2_bytes)
}

/// Parse a SoundFont-2 bank from a file on disk.
pub fn load_soundfont_file<P: AsRef<Path>>(path: P) -> Result<SoundFont, ScanError> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|e| ScanError::SoundFontParse(format!("failed to read '{}': {e}", path.display())))?;
    load_soundfont(&data)
}

/// Convert a recognized score to a JSON string.
/// Useful for passing data across FFI boundaries.
pub fn score_to_json(score: &Score) -> String {
    serde_json::to_string(score).unwrap_or_else(|_| "{}".to_string())
}

/// Rebuild a score from its JSON form.
pub fn score_from_json(json: &str) -> Result<Score, ScanError> {
    serde_json::from_str(json)
        .map_err(|e| ScanError::ImageDecode(format!("score JSON parse error: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI — for iOS (static library) and Android (JNI)
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Recognize a sheet image file and return the score as a JSON C
/// string. The caller must free the result with `sheetscan_free_string`.
///
/// # Safety
/// `path` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn sheetscan_process_file(path: *const c_char) -> *mut c_char {
    if path.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(path) };
    let path_str = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    match process_sheet_file(path_str, &Classifiers::none()) {
        Ok(score) => CString::new(score_to_json(&score))
            .unwrap_or_default()
            .into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Recognize a sheet image from raw bytes and return the score as a
/// JSON C string. The caller must free the result with
/// `sheetscan_free_string`.
///
/// # Safety
/// `data` must point to `len` valid bytes.
#[no_mangle]
pub unsafe extern "C" fn sheetscan_process_bytes(data: *const u8, len: usize) -> *mut c_char {
    if data.is_null() || len == 0 {
        return std::ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };

    match process_sheet(bytes, &Classifiers::none()) {
        Ok(score) => CString::new(score_to_json(&score))
            .unwrap_or_default()
            .into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Render a score (as JSON) to a WAV file and return the timing map as
/// a JSON C string. `sf2_path` may be null for the synthesized-tone
/// fallback; a `tempo` of 0 uses the default. The caller must free the
/// result with `sheetscan_free_string`.
///
/// # Safety
/// `score_json` and `wav_path` must be valid null-terminated UTF-8 C
/// strings; `sf2_path` may be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn sheetscan_render_wav_file(
    score_json: *const c_char,
    wav_path: *const c_char,
    sf2_path: *const c_char,
    tempo: u16,
    preset: u32,
) -> *mut c_char {
    if score_json.is_null() || wav_path.is_null() {
        return std::ptr::null_mut();
    }
    let json = match unsafe { CStr::from_ptr(score_json) }.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let out_path = match unsafe { CStr::from_ptr(wav_path) }.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let score = match score_from_json(json) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    let soundfont = if sf2_path.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(sf2_path) }
            .to_str()
            .ok()
            .and_then(|p| load_soundfont_file(p).ok())
    };

    let options = RenderOptions {
        tempo_bpm: if tempo == 0 { 120 } else { tempo },
        preset_index: preset,
        voices: VoiceMask::all(),
    };
    match render_audio(&score, &options, soundfont.as_ref()) {
        Ok(rendered) => {
            if std::fs::write(out_path, &rendered.wav).is_err() {
                return std::ptr::null_mut();
            }
            CString::new(timing_map_to_json(&rendered.timing_map))
                .unwrap_or_default()
                .into_raw()
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by sheetscan functions.
///
/// # Safety
/// `ptr` must be a string previously returned by a sheetscan function,
/// or null.
#[no_mangle]
pub unsafe extern "C" fn sheetscan_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
