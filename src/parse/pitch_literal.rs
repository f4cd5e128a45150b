//! Turns a single lexed pitch token's text into a `Pitch` value.

use crate::ast::Pitch;
use crate::token::TokenKind;

pub fn parse_pitch_literal(kind: TokenKind, text: &str) -> Pitch {
    match kind {
        TokenKind::PitchFrequency => Pitch::Frequency(text.parse().unwrap_or(0.0)),
        TokenKind::PitchRatio => {
            let (n, d) = super::parse_ratio_text(text);
            Pitch::Ratio(n, d.max(1))
        }
        TokenKind::PitchEdo => {
            let mut parts = text.splitn(2, '\\');
            let step: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
            let divisions: i64 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(12);
            Pitch::Edo(step, divisions.max(1))
        }
        TokenKind::PitchCents => {
            let digits = &text[..text.len() - 1];
            Pitch::Cents(digits.parse().unwrap_or(0.0))
        }
        TokenKind::PitchSpellSimple | TokenKind::PitchSpellOctave => parse_spell(text),
        other => panic!("not a pitch literal token: {:?}", other),
    }
}

fn parse_spell(text: &str) -> Pitch {
    let bytes = text.as_bytes();
    let letter = bytes[0] as char;
    let mut i = 1;
    let mut accidentals = 0i32;
    while i < bytes.len() && (bytes[i] == b'#' || bytes[i] == b'b') {
        accidentals += if bytes[i] == b'#' { 1 } else { -1 };
        i += 1;
    }

    let mut octave = None;
    let save = i;
    let mut j = i;
    if bytes.get(j) == Some(&b'-') {
        j += 1;
    }
    let digit_start = j;
    while bytes.get(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
        j += 1;
    }
    if j > digit_start {
        octave = text[save..j].parse::<i32>().ok();
        i = j;
    }

    let mut micro_offset = 0i32;
    while i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        micro_offset += if bytes[i] == b'+' { 1 } else { -1 };
        i += 1;
    }

    Pitch::Spell {
        letter,
        accidentals,
        octave,
        micro_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spell_with_octave_and_microtone() {
        match parse_spell("C#4+") {
            Pitch::Spell {
                letter,
                accidentals,
                octave,
                micro_offset,
            } => {
                assert_eq!(letter, 'C');
                assert_eq!(accidentals, 1);
                assert_eq!(octave, Some(4));
                assert_eq!(micro_offset, 1);
            }
            _ => panic!("expected Spell"),
        }
    }

    #[test]
    fn spell_negative_octave() {
        match parse_spell("Bb-1") {
            Pitch::Spell { octave, accidentals, .. } => {
                assert_eq!(octave, Some(-1));
                assert_eq!(accidentals, -1);
            }
            _ => panic!("expected Spell"),
        }
    }

    #[test]
    fn spell_without_octave_has_microtone() {
        match parse_spell("C#+") {
            Pitch::Spell { octave, micro_offset, .. } => {
                assert_eq!(octave, None);
                assert_eq!(micro_offset, 1);
            }
            _ => panic!("expected Spell"),
        }
    }

    #[test]
    fn ratio_literal() {
        assert_eq!(parse_pitch_literal(TokenKind::PitchRatio, "7/4"), Pitch::Ratio(7, 4));
    }

    #[test]
    fn edo_literal() {
        assert_eq!(parse_pitch_literal(TokenKind::PitchEdo, "7\\12"), Pitch::Edo(7, 12));
    }

    #[test]
    fn cents_literal() {
        assert_eq!(parse_pitch_literal(TokenKind::PitchCents, "-50c"), Pitch::Cents(-50.0));
    }
}
