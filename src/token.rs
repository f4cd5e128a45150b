//! Lexer: `tokenize(source) -> (tokens, diagnostics)`.
//!
//! Never aborts on malformed input: unrecognized runs degrade to
//! `Identifier` tokens or single-character punctuation, a digit run that
//! breaks its literal grammar (`7/`, `7c4`, `1.2.3`) becomes a single
//! `Identifier` with a `Warning` attached, and a broken duration bracket
//! is repaired in place. The scan is a hand-rolled maximal-munch pass
//! over the raw bytes; the grammar's prefix overlaps (`7`, `7/4`, `7\12`,
//! `7c`, `C`, `C#4`, `Cmaj`) need one-token lookahead, not a regex
//! engine.

use crate::diagnostics::Diagnostics;
use crate::span::Span;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Newline,
    Comment,
    Comma,
    Colon,
    Semicolon,
    At,
    Equals,
    LParen,
    RParen,
    LAngle,
    RAngle,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Identifier,
    PitchSpellOctave,
    PitchSpellSimple,
    PitchFrequency,
    PitchRatio,
    PitchEdo,
    PitchCents,
    PitchRest,
    PitchSustain,
    DurationFraction,
    DurationCommas,
    Quantize,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub from: usize,
    pub to: usize,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self {
            kind,
            from: span.from,
            to: span.to,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.from, self.to)
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span().slice(source)
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::Comment
        )
    }
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    diagnostics: Diagnostics,
}

pub fn tokenize(source: &str) -> (Vec<Token>, Diagnostics) {
    log::debug!("tokenizing {} bytes", source.len());
    let mut lexer = Lexer {
        source,
        bytes: source.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
        diagnostics: Diagnostics::new(),
    };
    lexer.run();
    (lexer.tokens, lexer.diagnostics)
}

fn is_accidental(c: u8) -> bool {
    c == b'#' || c == b'b'
}

fn is_micro(c: u8) -> bool {
    c == b'+' || c == b'-'
}

impl<'a> Lexer<'a> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn byte_at(&self, idx: usize) -> Option<u8> {
        self.bytes.get(idx).copied()
    }

    fn emit(&mut self, kind: TokenKind, from: usize, to: usize) {
        self.tokens.push(Token::new(kind, Span::new(from, to)));
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let c = self.bytes[self.pos];

            if c == b'/' && self.peek(1) == Some(b'/') {
                self.lex_comment(start);
                continue;
            }
            if c == b'\n' || c == b'\r' {
                self.lex_newline(start);
                continue;
            }
            if c == b' ' || c == b'\t' {
                self.lex_whitespace(start);
                continue;
            }
            if c == b'[' {
                self.lex_bracket(start);
                continue;
            }
            if c == b'{' {
                if self.try_lex_quantize(start) {
                    continue;
                }
            }
            if c.is_ascii_digit() || (c == b'-' && self.peek(1).map(|d| d.is_ascii_digit()).unwrap_or(false)) {
                self.lex_number(start);
                continue;
            }
            if c.is_ascii_uppercase() && (b'A'..=b'G').contains(&c) {
                if self.try_lex_pitch_spell(start) {
                    continue;
                }
            }
            if c == b'-' {
                self.emit(TokenKind::PitchSustain, start, start + 1);
                self.pos += 1;
                continue;
            }
            if c == b'.' {
                self.lex_rest(start);
                continue;
            }
            if c.is_ascii_alphabetic() || c == b'_' {
                self.lex_identifier(start);
                continue;
            }

            self.lex_punct_or_fallback(start);
        }
    }

    fn lex_comment(&mut self, start: usize) {
        let mut i = start + 2;
        while i < self.bytes.len() && self.bytes[i] != b'\n' {
            i += 1;
        }
        self.emit(TokenKind::Comment, start, i);
        self.pos = i;
    }

    fn lex_newline(&mut self, start: usize) {
        let mut i = start;
        while i < self.bytes.len() && (self.bytes[i] == b'\n' || self.bytes[i] == b'\r') {
            i += 1;
        }
        self.emit(TokenKind::Newline, start, i);
        self.pos = i;
    }

    fn lex_whitespace(&mut self, start: usize) {
        let mut i = start;
        while i < self.bytes.len() && (self.bytes[i] == b' ' || self.bytes[i] == b'\t') {
            i += 1;
        }
        self.emit(TokenKind::Whitespace, start, i);
        self.pos = i;
    }

    /// `[` always consumes at least one byte: either the full comma-run,
    /// the full fraction grammar, or (malformed) just the bracket itself,
    /// repaired in place as `DurationFraction(1)` with a diagnostic.
    fn lex_bracket(&mut self, start: usize) {
        let mut i = start + 1;

        // `[` followed by one-or-more commas then `]`
        let comma_start = i;
        while self.byte_at(i) == Some(b',') {
            i += 1;
        }
        if i > comma_start && self.byte_at(i) == Some(b']') {
            self.emit(TokenKind::DurationCommas, start, i + 1);
            self.pos = i + 1;
            return;
        }

        // `[` optional `-` digits (`:` digits)? `]`
        let mut j = start + 1;
        if self.byte_at(j) == Some(b'-') {
            j += 1;
        }
        let digits_start = j;
        while self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            j += 1;
        }
        if j > digits_start {
            if self.byte_at(j) == Some(b':') {
                let mut k = j + 1;
                let den_start = k;
                while self.byte_at(k).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                    k += 1;
                }
                if k > den_start && self.byte_at(k) == Some(b']') {
                    self.emit(TokenKind::DurationFraction, start, k + 1);
                    self.pos = k + 1;
                    return;
                }
            } else if self.byte_at(j) == Some(b']') {
                self.emit(TokenKind::DurationFraction, start, j + 1);
                self.pos = j + 1;
                return;
            }
        }

        // Malformed: repair as DurationFraction(1), consuming only `[`.
        self.diagnostics.warning(
            "malformed duration bracket, treated as [1]",
            Span::new(start, start + 1),
        );
        self.emit(TokenKind::DurationFraction, start, start + 1);
        self.pos = start + 1;
    }

    /// `{` digits (`:` digits)? `}`. Returns false (no bytes consumed) if
    /// the pattern doesn't match, so the caller falls through to the
    /// generic punctuation rule and emits a bare `LBrace`.
    fn try_lex_quantize(&mut self, start: usize) -> bool {
        let mut j = start + 1;
        let num_start = j;
        while self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            j += 1;
        }
        if j == num_start {
            return false;
        }
        if self.byte_at(j) == Some(b':') {
            let mut k = j + 1;
            let den_start = k;
            while self.byte_at(k).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                k += 1;
            }
            if k > den_start && self.byte_at(k) == Some(b'}') {
                self.emit(TokenKind::Quantize, start, k + 1);
                self.pos = k + 1;
                return true;
            }
            return false;
        }
        if self.byte_at(j) == Some(b'}') {
            self.emit(TokenKind::Quantize, start, j + 1);
            self.pos = j + 1;
            return true;
        }
        false
    }

    fn lex_number(&mut self, start: usize) {
        let mut i = start;
        if self.byte_at(i) == Some(b'-') {
            i += 1;
        }
        let int_start = i;
        while self.byte_at(i).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            i += 1;
        }
        if i == int_start {
            // Lone '-' is handled by the caller before reaching here.
            self.lex_identifier(start);
            return;
        }

        // `n/m`. A second `/` right after the digits starts a comment, not
        // a broken ratio.
        if self.byte_at(i) == Some(b'/') && self.byte_at(i + 1) != Some(b'/') {
            let den_start = i + 1;
            let mut j = den_start;
            while self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                j += 1;
            }
            if j == den_start || !self.at_word_boundary(j) {
                self.lex_malformed_number(start, j);
                return;
            }
            self.emit(TokenKind::PitchRatio, start, j);
            self.pos = j;
            return;
        }

        if self.byte_at(i) == Some(b'\\') {
            let den_start = i + 1;
            let mut j = den_start;
            while self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                j += 1;
            }
            if j == den_start || !self.at_word_boundary(j) {
                self.lex_malformed_number(start, j);
                return;
            }
            self.emit(TokenKind::PitchEdo, start, j);
            self.pos = j;
            return;
        }

        if self.byte_at(i) == Some(b'c') {
            if self.at_word_boundary(i + 1) {
                self.emit(TokenKind::PitchCents, start, i + 1);
                self.pos = i + 1;
                return;
            }
            self.lex_malformed_number(start, i + 1);
            return;
        }

        let mut j = i;
        if self.byte_at(j) == Some(b'.') && self.byte_at(j + 1).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            j += 1;
            while self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                j += 1;
            }
        }
        // A letter/underscore suffix (`7x`, `12abc`) or a second decimal
        // point (`1.2.3`) breaks the literal. A bare trailing `.` is NOT
        // part of the number; it reads as a following rest.
        let second_point = self.byte_at(j) == Some(b'.')
            && self.byte_at(j + 1).map(|b| b.is_ascii_digit()).unwrap_or(false);
        if !self.at_word_boundary(j) || second_point {
            self.lex_malformed_number(start, j);
            return;
        }
        self.emit(TokenKind::PitchFrequency, start, j);
        self.pos = j;
    }

    /// True when the byte at `pos` cannot extend an identifier-like word.
    fn at_word_boundary(&self, pos: usize) -> bool {
        !self
            .byte_at(pos)
            .map(|b| b.is_ascii_alphanumeric() || b == b'_')
            .unwrap_or(false)
    }

    /// A digit run that broke its literal grammar (`7/`, `7c4`, `1.2.3`,
    /// `7\x`). The whole word it starts degrades to one `Identifier` with
    /// a warning attached; parsing then treats it like any other name.
    fn lex_malformed_number(&mut self, start: usize, from: usize) {
        let mut i = from;
        while let Some(b) = self.byte_at(i) {
            let extends_word = b.is_ascii_alphanumeric()
                || b == b'_'
                || b == b'.'
                || b == b'\\'
                || (b == b'/' && self.byte_at(i + 1) != Some(b'/'));
            if !extends_word {
                break;
            }
            i += 1;
        }
        self.diagnostics.warning(
            "malformed numeric literal, treated as identifier",
            Span::new(start, i),
        );
        self.emit(TokenKind::Identifier, start, i);
        self.pos = i;
    }

    /// `[A-G]` accidental-run octave? micro-run, with a longest-match
    /// check against the identifier grammar sharing the same leading
    /// letter: a macro name like `Bridge` or `Cmaj` only overlaps the
    /// pitch-spell grammar in its first byte, so the identifier match
    /// (the whole word) beats the length-1 pitch-spell match and wins.
    /// Equal-length matches (bare `C`) still prefer pitch-spell. Returns
    /// false when the identifier wins, leaving `self.pos` untouched so
    /// the caller falls through to `lex_identifier`.
    fn try_lex_pitch_spell(&mut self, start: usize) -> bool {
        let mut i = start + 1;
        while self.byte_at(i).map(is_accidental).unwrap_or(false) {
            i += 1;
        }

        let mut has_octave = false;
        let mut j = i;
        if self.byte_at(j) == Some(b'-') || self.byte_at(j).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            let mut k = j;
            if self.byte_at(k) == Some(b'-') {
                k += 1;
            }
            let digit_start = k;
            while self.byte_at(k).map(|b| b.is_ascii_digit()).unwrap_or(false) {
                k += 1;
            }
            if k > digit_start {
                has_octave = true;
                j = k;
            }
        }

        while self.byte_at(j).map(is_micro).unwrap_or(false) {
            j += 1;
        }

        let identifier_end = self.identifier_match_end(start);
        if identifier_end > j {
            return false;
        }

        let kind = if has_octave {
            TokenKind::PitchSpellOctave
        } else {
            TokenKind::PitchSpellSimple
        };
        self.emit(kind, start, j);
        self.pos = j;
        true
    }

    /// Maximal `[A-Za-z_][A-Za-z0-9_]*` match length starting at `start`,
    /// without consuming anything. `start` is always an ASCII letter here.
    fn identifier_match_end(&self, start: usize) -> usize {
        let mut i = start + 1;
        while self
            .byte_at(i)
            .map(|b| b.is_ascii_alphanumeric() || b == b'_')
            .unwrap_or(false)
        {
            i += 1;
        }
        i
    }

    fn lex_rest(&mut self, start: usize) {
        let mut i = start;
        while self.byte_at(i) == Some(b'.') {
            i += 1;
        }
        self.emit(TokenKind::PitchRest, start, i);
        self.pos = i;
    }

    fn lex_identifier(&mut self, start: usize) {
        let mut i = start + 1;
        while self
            .byte_at(i)
            .map(|b| b.is_ascii_alphanumeric() || b == b'_')
            .unwrap_or(false)
        {
            i += 1;
        }
        self.emit(TokenKind::Identifier, start, i);
        self.pos = i;
    }

    fn lex_punct_or_fallback(&mut self, start: usize) {
        let c = self.bytes[start];
        let kind = match c {
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'@' => TokenKind::At,
            b'=' => TokenKind::Equals,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'<' => TokenKind::LAngle,
            b'>' => TokenKind::RAngle,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            _ => {
                // Any other byte (including non-ASCII UTF-8 continuation
                // sequences) degrades to a single-codepoint Identifier so
                // the lexer never aborts.
                let ch_len = utf8_char_len(c);
                self.emit(TokenKind::Identifier, start, start + ch_len);
                self.pos = start + ch_len;
                return;
            }
        };
        self.emit(kind, start, start + 1);
        self.pos = start + 1;
    }
}

fn utf8_char_len(first_byte: u8) -> usize {
    if first_byte & 0x80 == 0 {
        1
    } else if first_byte & 0xE0 == 0xC0 {
        2
    } else if first_byte & 0xF0 == 0xE0 {
        3
    } else if first_byte & 0xF8 == 0xF0 {
        4
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn covers_source_with_no_gaps() {
        let source = "(4/4)(120) C4,D4,E4,F4,";
        let (tokens, _) = tokenize(source);
        let mut cursor = 0;
        for t in &tokens {
            assert_eq!(t.from, cursor);
            cursor = t.to;
        }
        assert_eq!(cursor, source.len());
    }

    #[test]
    fn disambiguates_numeric_literals() {
        assert_eq!(kinds("7"), vec![TokenKind::PitchFrequency]);
        assert_eq!(kinds("7/4"), vec![TokenKind::PitchRatio]);
        assert_eq!(kinds(r"7\12"), vec![TokenKind::PitchEdo]);
        assert_eq!(kinds("7c"), vec![TokenKind::PitchCents]);
        assert_eq!(kinds("440.0"), vec![TokenKind::PitchFrequency]);
    }

    #[test]
    fn pitch_spellings() {
        assert_eq!(kinds("C#4"), vec![TokenKind::PitchSpellOctave]);
        assert_eq!(kinds("Bb-1"), vec![TokenKind::PitchSpellOctave]);
        assert_eq!(kinds("C#+"), vec![TokenKind::PitchSpellSimple]);
        assert_eq!(kinds("Bb"), vec![TokenKind::PitchSpellSimple]);
        assert_eq!(kinds("C"), vec![TokenKind::PitchSpellSimple]);
    }

    #[test]
    fn letter_prefixed_word_longer_than_one_char_lexes_as_identifier() {
        // "maj" extends past what the pitch-spell grammar can claim (no
        // accidental/octave/micro match), so the whole word is the longer
        // match and wins over the single-letter spelling.
        assert_eq!(kinds("Cmaj"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("Bridge"), vec![TokenKind::Identifier]);
        assert_eq!(kinds("Edo"), vec![TokenKind::Identifier]);
    }

    #[test]
    fn letter_prefixed_word_that_is_all_valid_spelling_bytes_stays_a_spelling() {
        // Every byte here is consumed by the pitch-spell grammar itself
        // (accidental + octave + micro), so the two matches tie in length
        // and pitch-spell wins the tie.
        assert_eq!(kinds("C#4++"), vec![TokenKind::PitchSpellOctave]);
    }

    #[test]
    fn rest_runs() {
        let (tokens, _) = tokenize("...");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::PitchRest);
        assert_eq!(tokens[0].to - tokens[0].from, 3);
    }

    #[test]
    fn sustain_vs_negative_number() {
        assert_eq!(kinds("-"), vec![TokenKind::PitchSustain]);
        assert_eq!(kinds("-5c"), vec![TokenKind::PitchCents]);
    }

    #[test]
    fn duration_fraction_and_commas() {
        assert_eq!(kinds("[3:4]"), vec![TokenKind::DurationFraction]);
        assert_eq!(kinds("[3]"), vec![TokenKind::DurationFraction]);
        assert_eq!(kinds("[,,,]"), vec![TokenKind::DurationCommas]);
        assert_eq!(kinds("[-1:4]"), vec![TokenKind::DurationFraction]);
    }

    #[test]
    fn malformed_numeric_runs_degrade_to_identifiers_with_warnings() {
        for source in ["7/", "7\\", "7c4", "7/4abc", "1.2.3", "12_x"] {
            let (tokens, diags) = tokenize(source);
            assert_eq!(tokens.len(), 1, "{:?} should be one repaired token", source);
            assert_eq!(tokens[0].kind, TokenKind::Identifier, "{:?}", source);
            assert_eq!(tokens[0].to - tokens[0].from, source.len(), "{:?}", source);
            assert!(!diags.0.is_empty(), "{:?} should warn", source);
        }
    }

    #[test]
    fn number_directly_before_a_comment_is_not_malformed() {
        let (tokens, diags) = tokenize("7//x");
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![TokenKind::PitchFrequency, TokenKind::Comment]
        );
        assert!(diags.0.is_empty());
    }

    #[test]
    fn trailing_bare_dot_reads_as_a_rest_not_a_malformed_number() {
        let (tokens, diags) = tokenize("440.");
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![TokenKind::PitchFrequency, TokenKind::PitchRest]
        );
        assert!(diags.0.is_empty());
    }

    #[test]
    fn malformed_bracket_is_repaired_with_diagnostic() {
        let (tokens, diags) = tokenize("[abc");
        assert_eq!(tokens[0].kind, TokenKind::DurationFraction);
        assert_eq!(tokens[0].to - tokens[0].from, 1);
        assert!(!diags.0.is_empty());
    }

    #[test]
    fn quantize_token_or_bare_brace() {
        assert_eq!(kinds("{4}"), vec![TokenKind::Quantize]);
        assert_eq!(kinds("{4:3}"), vec![TokenKind::Quantize]);
        assert_eq!(kinds("{abc}"), vec![TokenKind::LBrace, TokenKind::Identifier, TokenKind::RBrace]);
    }

    #[test]
    fn stray_close_bracket_is_punctuation() {
        assert_eq!(kinds("]"), vec![TokenKind::RBracket]);
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            kinds(",:;@=()<>"),
            vec![
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::At,
                TokenKind::Equals,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LAngle,
                TokenKind::RAngle,
            ]
        );
    }
}
