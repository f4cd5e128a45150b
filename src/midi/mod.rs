//! MIDI export: turns resolved `Event`s into a Standard MIDI File, using
//! pitch bend to carry microtonal accuracy that a bare MIDI note number
//! can't.
//!
//! Every note resolves to a nearest 12-TET key plus a per-channel bend;
//! validation runs the same math as serialization so a score that
//! validates always writes.

mod channel;
mod smf;

use crate::error::{Result, SymiError};
use crate::resolve::{Event, NoteEvent};
use serde::{Deserialize, Serialize};

pub use channel::{assign_channels, ChannelAssignment};

const DEFAULT_TPQ: u16 = 480;
const DEFAULT_VELOCITY: u8 = 64;
const DEFAULT_PROGRAM: u8 = 0;
const PITCH_BEND_UNITS: i32 = 8192; // +-8192 covers the full configured range each direction

/// MIDI ticks are mapped from real seconds through a fixed reference tempo
/// rather than the (possibly piecewise) Symi tempo that produced those
/// seconds in the first place: every event's `start_sec` already bakes in
/// whatever tempo/base-frequency changes were in effect when the resolver
/// walked past it, so the file only needs one constant declared tempo to
/// reproduce the same absolute timing.
pub(crate) const REFERENCE_BPM: f64 = 120.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MidiExportOptions {
    pub tpq: u16,
    pub velocity: u8,
    pub program: u8,
    /// RPN 0,0 pitch-bend range, in semitones each direction.
    pub bend_range_semitones: u8,
    /// Largest quantization error (in cents) tolerated when snapping a
    /// frequency to the nearest representable 14-bit pitch-bend value.
    pub max_tolerance_cents: f64,
    /// Largest drift (in seconds) tolerated between a note's resolved
    /// `start_sec` and the wall-clock time its rounded tick actually lands
    /// on.
    pub time_tolerance_sec: f64,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        MidiExportOptions {
            tpq: DEFAULT_TPQ,
            velocity: DEFAULT_VELOCITY,
            program: DEFAULT_PROGRAM,
            bend_range_semitones: 2,
            max_tolerance_cents: 1.0,
            time_tolerance_sec: 0.001,
        }
    }
}

/// How many ticks the reference tempo advances per second, at the given
/// resolution. Shared by validation (time-tolerance check) and the SMF
/// writer (absolute tick placement) so both sides round the same way.
pub(crate) fn ticks_per_second(tpq: u16) -> f64 {
    tpq as f64 * REFERENCE_BPM / 60.0
}

/// Rounds `sec` to its nearest representable tick under `tpq` and converts
/// back to seconds, the same lossy step `export_to_smf` performs when
/// placing a NoteOn.
pub(crate) fn round_trip_seconds(sec: f64, tpq: u16) -> f64 {
    let tps = ticks_per_second(tpq);
    let tick = (sec * tps).round().max(0.0);
    tick / tps
}

fn check_time_tolerance(note: &NoteEvent, options: &MidiExportOptions) -> Result<()> {
    let actual = round_trip_seconds(note.start_sec, options.tpq);
    let drift = (actual - note.start_sec).abs();
    if drift > options.time_tolerance_sec {
        return Err(SymiError::TimeToleranceExceeded {
            freq: note.freq,
            tolerance_sec: options.time_tolerance_sec,
            actual_drift_sec: drift,
            span_from: note.span_from,
            span_to: note.span_to,
        });
    }
    Ok(())
}

/// A note's pitch resolved to a MIDI key number plus the pitch-bend offset
/// (in [-1.0, 1.0], a fraction of `bend_range_semitones`) needed to reach
/// the exact frequency from that key. Rounding to the nearest key always
/// leaves at most 50 cents to bend, so this only fails via
/// `ToleranceExceeded` when the configured range is too coarse to resolve
/// that residue within `max_tolerance_cents`.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedPitch {
    pub key: u8,
    pub bend: f64,
    pub cents_from_key: f64,
}

pub fn resolve_pitch_to_key_and_bend(
    freq: f64,
    options: &MidiExportOptions,
    span: (usize, usize),
) -> Result<ResolvedPitch> {
    let exact_key = 69.0 + 12.0 * (freq / 440.0).log2();
    let key = exact_key.round().clamp(0.0, 127.0);
    let cents_from_key = (exact_key - key) * 100.0;
    let bend = quantize_bend(cents_from_key, options.bend_range_semitones);
    check_tolerance(freq, cents_from_key, bend, options, span)?;
    Ok(ResolvedPitch {
        key: key as u8,
        bend,
        cents_from_key,
    })
}

/// Resolves the pitch-bend fraction needed to reach `to_freq` from a note
/// whose MIDI key was fixed by `from_freq` (an `@`-chain keeps the same
/// key and ramps the bend, since MIDI has no way to re-trigger a note
/// mid-glide without a new Note On). Fails with `BendOutOfRange` once the
/// distance from the fixed key exceeds the configured range in either
/// direction.
pub fn resolve_chain_target_bend(
    key: u8,
    to_freq: f64,
    options: &MidiExportOptions,
    span: (usize, usize),
) -> Result<f64> {
    let exact_target = 69.0 + 12.0 * (to_freq / 440.0).log2();
    let semitones_needed = exact_target - key as f64;
    if semitones_needed.abs() > options.bend_range_semitones as f64 {
        return Err(SymiError::BendOutOfRange {
            freq: to_freq,
            needed_semitones: semitones_needed,
            range_semitones: options.bend_range_semitones,
            span_from: span.0,
            span_to: span.1,
        });
    }
    let cents_needed = semitones_needed * 100.0;
    let bend = quantize_bend(cents_needed, options.bend_range_semitones);
    check_tolerance(to_freq, cents_needed, bend, options, span)?;
    Ok(bend)
}

fn quantize_bend(cents: f64, range_semitones: u8) -> f64 {
    if range_semitones == 0 {
        return 0.0;
    }
    let bend = cents / 100.0 / range_semitones as f64;
    let bend_unit = (bend * PITCH_BEND_UNITS as f64).round();
    bend_unit / PITCH_BEND_UNITS as f64
}

fn check_tolerance(
    freq: f64,
    cents_needed: f64,
    bend: f64,
    options: &MidiExportOptions,
    span: (usize, usize),
) -> Result<()> {
    let achieved_cents = bend * options.bend_range_semitones as f64 * 100.0;
    let error_cents = (cents_needed - achieved_cents).abs();
    if error_cents > options.max_tolerance_cents {
        return Err(SymiError::ToleranceExceeded {
            freq,
            tolerance_cents: options.max_tolerance_cents,
            actual_cents: error_cents,
            span_from: span.0,
            span_to: span.1,
        });
    }
    Ok(())
}

/// Validates that every `Event::Note` (and any `@`-chain target) can be
/// represented under `options` without actually writing a file.
pub fn validate_export(events: &[Event], options: &MidiExportOptions) -> Result<()> {
    let notes: Vec<&NoteEvent> = events
        .iter()
        .filter_map(|e| match e {
            Event::Note(n) => Some(n),
            _ => None,
        })
        .collect();
    for note in &notes {
        check_time_tolerance(note, options)?;
        let span = (note.span_from, note.span_to);
        let resolved = resolve_pitch_to_key_and_bend(note.freq, options, span)?;
        if let Some(to_freq) = note.chain_to_freq {
            resolve_chain_target_bend(resolved.key, to_freq, options, span)?;
        }
    }
    assign_channels(&notes, options)?;
    Ok(())
}

/// Builds a complete Standard MIDI File for the given events.
pub fn export_to_smf(events: &[Event], options: &MidiExportOptions) -> Result<Vec<u8>> {
    let notes: Vec<&NoteEvent> = events
        .iter()
        .filter_map(|e| match e {
            Event::Note(n) => Some(n),
            _ => None,
        })
        .collect();
    let channels = assign_channels(&notes, options)?;
    smf::build_and_write(&notes, &channels, options)
}
