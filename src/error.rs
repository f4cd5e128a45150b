//! Hard errors: conditions a pipeline stage cannot recover from in place
//! and must surface to the caller, as opposed to `Diagnostic`s which are
//! collected while the pipeline keeps going.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymiError {
    #[error("note at {freq:.3}Hz (bytes {span_from}..{span_to}) needs a {needed_semitones:.2} semitone bend, outside the configured range of +/-{range_semitones}")]
    BendOutOfRange {
        freq: f64,
        needed_semitones: f64,
        range_semitones: u8,
        span_from: usize,
        span_to: usize,
    },

    #[error("note at {freq:.3}Hz (bytes {span_from}..{span_to}) cannot be represented within {tolerance_cents:.2} cents at 14-bit pitch-bend resolution (off by {actual_cents:.3} cents)")]
    ToleranceExceeded {
        freq: f64,
        tolerance_cents: f64,
        actual_cents: f64,
        span_from: usize,
        span_to: usize,
    },

    #[error("note at {freq:.3}Hz (bytes {span_from}..{span_to}) starts at tick-rounded {actual_drift_sec:.6}s off from its resolved time, outside the {tolerance_sec:.6}s tolerance")]
    TimeToleranceExceeded {
        freq: f64,
        tolerance_sec: f64,
        actual_drift_sec: f64,
        span_from: usize,
        span_to: usize,
    },

    #[error("no MIDI channel available after opening {tracks_opened} note tracks of {available_channels} channels each (ticksPerQuarter may be set too low for this density)")]
    NoChannelAvailable { tracks_opened: usize, available_channels: usize },

    #[error("unknown file id '{0}'")]
    UnknownFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI encoding error: {0}")]
    Midi(String),
}

pub type Result<T> = std::result::Result<T, SymiError>;
