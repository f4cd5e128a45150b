//! Pitch-literal to frequency resolution.
//!
//! `Ratio`/`Edo`/`Cents` pitches multiply the current base frequency.
//! `Spell` pitches resolve against a 12-tone equal-tempered grid pinned to
//! an anchor pitch, A4 = 440Hz until a base-frequency header with a
//! spelled reference (`<A4=432>`) re-pins it. A numeric-only base change
//! never moves spelled pitches; naming the reference does. A
//! bare `Spell` with no octave digits inherits the previous spelled
//! pitch's octave on the same voice, defaulting to 4 if this is the first
//! one.

use crate::ast::Pitch;

/// The frequency environment a pitch literal resolves in.
#[derive(Clone, Copy, Debug)]
pub struct PitchContext {
    /// Reference for `Ratio`/`Edo`/`Cents` pitches.
    pub base_freq: f64,
    /// MIDI number of the pitch the 12-TET grid is pinned to.
    pub anchor_midi: i32,
    /// Frequency that pinned pitch sounds at.
    pub anchor_freq: f64,
}

impl Default for PitchContext {
    fn default() -> Self {
        PitchContext {
            base_freq: 261.625565,
            anchor_midi: 69,
            anchor_freq: 440.0,
        }
    }
}

pub fn letter_to_semitone(letter: char) -> i32 {
    match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => 0,
    }
}

/// MIDI note number of a spelled pitch, before any quarter-tone offset.
pub fn spell_midi_number(letter: char, accidentals: i32, octave: i32) -> i32 {
    (octave + 1) * 12 + letter_to_semitone(letter) + accidentals
}

/// Resolves a pitch literal to Hz, threading the voice's running "last
/// spelled octave" so that octave-less `Spell`s chain sensibly.
pub fn resolve_pitch_hz(pitch: &Pitch, ctx: &PitchContext, last_spell_octave: &mut Option<i32>) -> f64 {
    match pitch {
        Pitch::Rest(_) | Pitch::Sustain => {
            debug_assert!(false, "Rest/Sustain are not resolved as pitch values");
            ctx.base_freq
        }
        Pitch::Frequency(hz) => *hz,
        Pitch::Ratio(n, d) => ctx.base_freq * (*n as f64 / *d as f64),
        Pitch::Edo(step, divisions) => ctx.base_freq * 2f64.powf(*step as f64 / *divisions as f64),
        Pitch::Cents(cents) => ctx.base_freq * 2f64.powf(cents / 1200.0),
        Pitch::Spell {
            letter,
            accidentals,
            octave,
            micro_offset,
        } => {
            let oct = octave.unwrap_or_else(|| last_spell_octave.unwrap_or(4));
            *last_spell_octave = Some(oct);
            let midi_number = spell_midi_number(*letter, *accidentals, oct);
            ctx.anchor_freq
                * 2f64.powf((midi_number - ctx.anchor_midi) as f64 / 12.0)
                * 2f64.powf(*micro_offset as f64 / 24.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_c_matches_default_base_frequency() {
        let mut last = None;
        let hz = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'C',
                accidentals: 0,
                octave: Some(4),
                micro_offset: 0,
            },
            &PitchContext::default(),
            &mut last,
        );
        assert!((hz - 261.625565).abs() < 1e-3);
        assert_eq!(last, Some(4));
    }

    #[test]
    fn octave_inherited_when_absent() {
        let mut last = Some(5);
        let hz = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'C',
                accidentals: 0,
                octave: None,
                micro_offset: 0,
            },
            &PitchContext::default(),
            &mut last,
        );
        assert!((hz - 523.251131).abs() < 1e-3);
    }

    #[test]
    fn ratio_and_edo_scale_base_freq() {
        let mut last = None;
        let ctx = PitchContext {
            base_freq: 200.0,
            ..PitchContext::default()
        };
        assert!((resolve_pitch_hz(&Pitch::Ratio(3, 2), &ctx, &mut last) - 300.0).abs() < 1e-9);
        let octave_up = resolve_pitch_hz(&Pitch::Edo(12, 12), &ctx, &mut last);
        assert!((octave_up - 400.0).abs() < 1e-6);
    }

    #[test]
    fn re_anchored_grid_moves_spelled_pitches() {
        let mut last = None;
        let ctx = PitchContext {
            base_freq: 432.0,
            anchor_midi: 69,
            anchor_freq: 432.0,
        };
        let a4 = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'A',
                accidentals: 0,
                octave: Some(4),
                micro_offset: 0,
            },
            &ctx,
            &mut last,
        );
        assert!((a4 - 432.0).abs() < 1e-9);
        let e5 = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'E',
                accidentals: 0,
                octave: Some(5),
                micro_offset: 0,
            },
            &ctx,
            &mut last,
        );
        assert!((e5 - 432.0 * 2f64.powf(7.0 / 12.0)).abs() < 1e-6);
    }

    #[test]
    fn quarter_tone_suffix_shifts_by_fifty_cents() {
        let mut last = None;
        let plain = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'C',
                accidentals: 0,
                octave: Some(4),
                micro_offset: 0,
            },
            &PitchContext::default(),
            &mut last,
        );
        let raised = resolve_pitch_hz(
            &Pitch::Spell {
                letter: 'C',
                accidentals: 0,
                octave: Some(4),
                micro_offset: 1,
            },
            &PitchContext::default(),
            &mut last,
        );
        assert!((raised / plain - 2f64.powf(50.0 / 1200.0)).abs() < 1e-9);
    }
}
