//! Error taxonomy for the recognition and rendering pipelines.
//!
//! Every stage surfaces its error to the top-level call; nothing is
//! swallowed inside a stage. Some variants are non-fatal by contract:
//! a missing classifier degrades the stage that needed it, and SoundFont
//! problems make the renderer fall back to synthesized tones.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The input bytes could not be decoded as a supported image format.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// The decoded image is below the 50×50 px minimum.
    #[error("image too small: {width}x{height} (minimum 50x50)")]
    ImageTooSmall { width: u32, height: u32 },

    /// No staff systems were found. The photo is likely unusable;
    /// callers should advise re-photographing.
    #[error("no staves detected in image")]
    NoStavesDetected,

    /// A neural classifier handle was not provided. Recorded by the
    /// stage that wanted it; never fatal on its own.
    #[error("classifier '{0}' unavailable")]
    ModelUnavailable(&'static str),

    /// The SoundFont bytes are not a valid sfbk RIFF or miss a required
    /// chunk. Audio rendering falls back to synthesized tones.
    #[error("soundfont parse failed: {0}")]
    SoundFontParse(String),

    /// The active preset selected zero zones.
    #[error("soundfont preset {0} has no zones")]
    SoundFontZoneEmpty(u32),

    /// The score contains no notes; the renderer returns a short
    /// silent WAV instead of audio.
    #[error("score has no playable events")]
    NoPlayableEvents,

    /// Cooperative cancellation was requested between stages.
    #[error("cancelled at stage '{0}'")]
    Cancelled(&'static str),

    /// An internal invariant broke (MIDI out of range, negative tie
    /// duration, oversized quantization residual). Implementation bug.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl ScanError {
    /// Whether the renderer can continue with a degraded path instead
    /// of surfacing this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScanError::ModelUnavailable(_)
                | ScanError::SoundFontParse(_)
                | ScanError::SoundFontZoneEmpty(_)
                | ScanError::NoPlayableEvents
        )
    }
}
