//! Recursive-descent parser: `parse(tokens, source) -> (Root, Diagnostics)`.
//!
//! Error-tolerant: an unexpected token produces an `Error` diagnostic and
//! parsing resynchronizes at the next `,`, `;`, newline, or closing
//! bracket rather than aborting the file. Statements never nest across
//! newlines, so the outer pass splits on `Newline` tokens first and each
//! line is parsed independently, which bounds error recovery to a single
//! line. The editor re-runs the pipeline on every keystroke, so cross-line
//! bracket repair isn't worth its complexity.

mod pitch_literal;
mod sequence;

pub use pitch_literal::parse_pitch_literal;

use crate::ast::{ChainKind, Node, Origin};
use crate::diagnostics::Diagnostics;
use crate::rational::{rational, Rational};
use crate::span::Span;
use crate::token::{Token, TokenKind};

pub fn parse(tokens: &[Token], source: &str) -> (Node, Diagnostics) {
    log::debug!("parsing {} tokens", tokens.len());
    let mut diagnostics = Diagnostics::new();
    let lines = split_lines(tokens);
    let mut items = Vec::new();

    for line in lines {
        let content: Vec<Token> = line
            .iter()
            .copied()
            .filter(|t| !t.is_trivia())
            .collect();
        if content.is_empty() {
            continue;
        }
        let mut p = LineParser {
            toks: &content,
            source,
            pos: 0,
            diags: &mut diagnostics,
        };
        p.parse_line_into(&mut items);
    }

    let span = if items.is_empty() {
        Span::new(0, source.len())
    } else {
        items.first().unwrap().span().cover(items.last().unwrap().span())
    };
    (Node::Root { items, span }, diagnostics)
}

fn split_lines(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    for &t in tokens {
        if t.kind == TokenKind::Newline {
            lines.push(std::mem::take(&mut current));
        } else {
            current.push(t);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub(crate) struct LineParser<'t, 's> {
    pub toks: &'t [Token],
    pub source: &'s str,
    pub pos: usize,
    pub diags: &'t mut Diagnostics,
}

impl<'t, 's> LineParser<'t, 's> {
    pub fn peek(&self) -> Option<Token> {
        self.toks.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<Token> {
        self.toks.get(self.pos + offset).copied()
    }

    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    pub fn advance(&mut self) -> Option<Token> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    pub fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_kind() == Some(kind) {
            self.advance()
        } else {
            None
        }
    }

    pub fn text(&self, t: Token) -> &'s str {
        t.text(self.source)
    }

    pub fn last_span(&self) -> Span {
        self.toks.last().map(|t| t.span()).unwrap_or(Span::new(0, 0))
    }

    /// Skip to the next comma/semicolon/closing-bracket boundary after an
    /// unexpected token (newline is implicit since each line is parsed in
    /// isolation).
    pub fn synchronize(&mut self) {
        while let Some(k) = self.peek_kind() {
            if matches!(
                k,
                TokenKind::Comma
                    | TokenKind::Semicolon
                    | TokenKind::RParen
                    | TokenKind::RBracket
                    | TokenKind::RBrace
                    | TokenKind::RAngle
            ) {
                return;
            }
            self.advance();
        }
    }

    /// One logical line may hold several statements: any number of leading
    /// control headers followed by at most one macro definition, ghost
    /// line, or sequence (`(4/4)(120) C4,D4,E4,F4,` is a single line).
    /// Once the non-control part starts, a `(` is a rhythm group again.
    fn parse_line_into(&mut self, out: &mut Vec<Node>) {
        loop {
            let node = match self.peek_kind() {
                Some(TokenKind::LParen) if self.looks_like_control_paren() => {
                    self.parse_control_header()
                }
                Some(TokenKind::LAngle) => self.parse_control_base_freq(),
                _ => break,
            };
            if let Some(node) = node {
                out.push(node);
            }
        }
        if self.at_end() {
            return;
        }
        let node = match self.peek_kind() {
            Some(TokenKind::Identifier) if self.looks_like_macro_def() => self.parse_macro_def(),
            Some(TokenKind::Equals) => self.parse_ghost_line(),
            _ => Some(sequence::parse_top_level_sequence(self)),
        };
        if let Some(node) = node {
            out.push(node);
        }
    }

    /// Distinguishes a `(…)` control header from a parenthesized rhythm
    /// group by looking at what immediately follows the paren: `(4/4)` is
    /// a lexed ratio, `(120)` a bare number, `([-1:4]=…)` an anchored BPM.
    fn looks_like_control_paren(&self) -> bool {
        let first = self.toks.get(self.pos + 1).map(|t| t.kind);
        let second = self.toks.get(self.pos + 2).map(|t| t.kind);
        match first {
            Some(TokenKind::PitchRatio) | Some(TokenKind::PitchFrequency) => {
                second == Some(TokenKind::RParen)
            }
            Some(TokenKind::DurationFraction) => second == Some(TokenKind::Equals),
            _ => false,
        }
    }

    /// `Identifier (`(` `)`)? `=``, checked by lookahead without consuming.
    fn looks_like_macro_def(&self) -> bool {
        let mut i = self.pos + 1;
        if self.toks.get(i).map(|t| t.kind) == Some(TokenKind::LParen) {
            if self.toks.get(i + 1).map(|t| t.kind) == Some(TokenKind::RParen) {
                i += 2;
            } else {
                return false;
            }
        }
        self.toks.get(i).map(|t| t.kind) == Some(TokenKind::Equals)
    }

    fn parse_macro_def(&mut self) -> Option<Node> {
        let name_tok = self.advance()?;
        let name = self.text(name_tok).to_string();
        let mut has_relative_marker = false;
        if self.eat(TokenKind::LParen).is_some() {
            self.eat(TokenKind::RParen);
            has_relative_marker = true;
        }
        self.eat(TokenKind::Equals);
        let body = sequence::parse_top_level_sequence(self);
        let span = name_tok.span().cover(body.span());
        Some(Node::MacroDef {
            name,
            has_relative_marker,
            body: Box::new(body),
            span,
        })
    }

    fn parse_ghost_line(&mut self) -> Option<Node> {
        let eq = self.advance()?;
        let body = sequence::parse_top_level_sequence(self);
        let span = eq.span().cover(body.span());
        Some(Node::GhostLine {
            body: Box::new(body),
            span,
        })
    }

    fn parse_control_header(&mut self) -> Option<Node> {
        let lparen = self.advance()?;

        // `([-1:4]=120)`: beat-anchored BPM.
        if self.peek_kind() == Some(TokenKind::DurationFraction) {
            let frac_tok = self.advance()?;
            let beat_fraction = Some(parse_duration_fraction_value(self.text(frac_tok)));
            self.eat(TokenKind::Equals);
            let bpm = self.parse_numeric_operand().unwrap_or(120.0);
            let rparen = self.expect_rparen();
            let span = lparen.span().cover(rparen);
            return Some(Node::ControlBpm {
                beat_fraction,
                bpm,
                span,
            });
        }

        // `(4/4)`: time signature, lexed as a single PitchRatio token.
        if self.peek_kind() == Some(TokenKind::PitchRatio) {
            let tok = self.advance()?;
            let (num, den) = parse_ratio_text(self.text(tok));
            let rparen = self.expect_rparen();
            let span = lparen.span().cover(rparen);
            return Some(Node::ControlTimeSig { num, den, span });
        }

        // `(120)`: plain BPM.
        if let Some(bpm) = self.parse_numeric_operand() {
            let rparen = self.expect_rparen();
            let span = lparen.span().cover(rparen);
            return Some(Node::ControlBpm {
                beat_fraction: None,
                bpm,
                span,
            });
        }

        self.diags.error(
            "malformed control header, expected time signature or bpm",
            lparen.span(),
        );
        self.synchronize();
        let rparen = self.expect_rparen();
        Some(Node::ControlBpm {
            beat_fraction: None,
            bpm: 120.0,
            span: lparen.span().cover(rparen),
        })
    }

    fn parse_control_base_freq(&mut self) -> Option<Node> {
        let langle = self.advance()?;
        let mut items = Vec::new();
        loop {
            if self.peek_kind() == Some(TokenKind::RAngle) || self.at_end() {
                break;
            }
            let first = match self.parse_pitch_operand() {
                Some(p) => p,
                None => {
                    self.diags.error("expected pitch in base-frequency header", self.current_span());
                    self.synchronize();
                    break;
                }
            };
            if self.eat(TokenKind::Equals).is_some() {
                if let Some(second) = self.parse_pitch_operand() {
                    items.push((Some(first), second));
                } else {
                    self.diags.error("expected frequency after '='", self.current_span());
                    items.push((Some(first.clone()), first));
                }
            } else {
                items.push((None, first));
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        let rangle = self.expect(TokenKind::RAngle);
        let span = langle.span().cover(rangle);
        Some(Node::ControlBaseFreq { items, span })
    }

    fn expect(&mut self, kind: TokenKind) -> Span {
        if let Some(t) = self.eat(kind) {
            t.span()
        } else {
            self.last_span()
        }
    }

    fn expect_rparen(&mut self) -> Span {
        self.expect(TokenKind::RParen)
    }

    pub(crate) fn current_span(&self) -> Span {
        self.peek().map(|t| t.span()).unwrap_or(self.last_span())
    }

    fn parse_numeric_operand(&mut self) -> Option<f64> {
        if self.peek_kind() == Some(TokenKind::PitchFrequency) {
            let t = self.advance()?;
            self.text(t).parse::<f64>().ok()
        } else {
            None
        }
    }

    fn parse_pitch_operand(&mut self) -> Option<crate::ast::Pitch> {
        let t = self.peek()?;
        if matches!(
            t.kind,
            TokenKind::PitchFrequency
                | TokenKind::PitchRatio
                | TokenKind::PitchEdo
                | TokenKind::PitchCents
                | TokenKind::PitchSpellSimple
                | TokenKind::PitchSpellOctave
        ) {
            self.advance();
            Some(parse_pitch_literal(t.kind, self.text(t)))
        } else {
            None
        }
    }
}

pub(crate) fn parse_ratio_text(text: &str) -> (i64, i64) {
    let mut parts = text.splitn(2, '/');
    let n = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let d = parts.next().unwrap_or("1").parse().unwrap_or(1);
    (n, d)
}

/// `[n]`, `[n:m]`, `[-n:m]` -> Rational. A negative numerator carries no
/// distinct meaning and is normalized to its positive magnitude.
pub(crate) fn parse_duration_fraction_value(text: &str) -> Rational {
    let inner = &text[1..text.len() - 1];
    let mut parts = inner.splitn(2, ':');
    let num_text = parts.next().unwrap_or("1");
    let num: i64 = num_text.parse().unwrap_or(1);
    let den: i64 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(1);
    rational(num.abs().max(1), den.max(1))
}

pub(crate) fn chain_node(from: Node, to: Node, span: Span) -> Node {
    Node::Chain {
        kind: ChainKind::Chain,
        from: Box::new(from),
        to: Box::new(to),
        span,
        origin: Origin::Direct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Pitch;
    use crate::token::tokenize;

    fn parse_source(source: &str) -> (Vec<Node>, Diagnostics) {
        let (tokens, _) = tokenize(source);
        let (root, diags) = parse(&tokens, source);
        let Node::Root { items, .. } = root else {
            panic!("parse did not return a Root");
        };
        (items, diags)
    }

    #[test]
    fn control_headers_and_sequence_share_one_line() {
        let (items, diags) = parse_source("(4/4)(120) C4,D4,E4,F4,");
        assert!(!diags.has_errors());
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Node::ControlTimeSig { num: 4, den: 4, .. }));
        assert!(matches!(items[1], Node::ControlBpm { beat_fraction: None, .. }));
        assert!(matches!(items[2], Node::Sequence { .. }));
    }

    #[test]
    fn anchored_bpm_header_keeps_its_beat_fraction() {
        let (items, _) = parse_source("([-1:4]=72)");
        let Node::ControlBpm { beat_fraction, bpm, .. } = &items[0] else {
            panic!("expected ControlBpm");
        };
        assert_eq!(*beat_fraction, Some(rational(1, 4)));
        assert!((bpm - 72.0).abs() < 1e-9);
    }

    #[test]
    fn chained_base_freq_header_keeps_every_pair() {
        let (items, _) = parse_source("<C4=261.63, A4=440>");
        let Node::ControlBaseFreq { items: pairs, .. } = &items[0] else {
            panic!("expected ControlBaseFreq");
        };
        assert_eq!(pairs.len(), 2);
        assert!(matches!(pairs[0].0, Some(Pitch::Spell { letter: 'C', .. })));
        assert!(matches!(pairs[1].1, Pitch::Frequency(f) if (f - 440.0).abs() < 1e-9));
    }

    #[test]
    fn relative_marker_on_macro_definition() {
        let (items, _) = parse_source("x() = C,D,");
        // Definitions carry the marker; bodies stay ordinary sequences.
        assert!(matches!(
            &items[0],
            Node::MacroDef { has_relative_marker: true, .. }
        ));
        let (items, _) = parse_source("x = C,D,");
        assert!(matches!(
            &items[0],
            Node::MacroDef { has_relative_marker: false, .. }
        ));
    }

    #[test]
    fn ghost_line_follows_its_line() {
        let (items, _) = parse_source("C,D,\n= E,F,");
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Node::Sequence { .. }));
        assert!(matches!(items[1], Node::GhostLine { .. }));
    }

    #[test]
    fn semicolon_splits_voices_into_a_chord() {
        let (items, _) = parse_source("C4,D4;E4,F4,");
        let Node::Chord { voices, .. } = &items[0] else {
            panic!("expected Chord");
        };
        assert_eq!(voices.len(), 2);
    }

    #[test]
    fn colon_after_identifier_builds_a_macro_voice_chord() {
        let (items, _) = parse_source("lo:A,B,");
        let Node::Chord { voices, .. } = &items[0] else {
            panic!("expected Chord");
        };
        let Node::Sequence { items: first, .. } = &voices[0] else {
            panic!("expected macro voice sequence");
        };
        assert!(matches!(&first[0], Node::MacroCall { name, .. } if name == "lo"));
    }

    #[test]
    fn parenthesized_group_is_not_mistaken_for_a_control_header() {
        let (items, _) = parse_source("(C4,D4),E4,");
        let Node::Sequence { items: seq, .. } = &items[0] else {
            panic!("expected Sequence");
        };
        assert!(matches!(seq[0], Node::Group { .. }));
        assert!(matches!(seq[1], Node::Note { .. }));
    }

    #[test]
    fn chain_is_right_associative() {
        let (items, _) = parse_source("C4@E4@G4,");
        let Node::Sequence { items: seq, .. } = &items[0] else {
            panic!("expected Sequence");
        };
        let Node::Chain { from, to, .. } = &seq[0] else {
            panic!("expected Chain");
        };
        assert!(matches!(from.as_ref(), Node::Note { .. }));
        assert!(matches!(to.as_ref(), Node::Chain { .. }));
    }

    #[test]
    fn unexpected_token_errors_and_synchronizes_to_the_next_comma() {
        let (items, diags) = parse_source("C4,}E4,F4,");
        assert!(diags.has_errors());
        let Node::Sequence { items: seq, .. } = &items[0] else {
            panic!("expected Sequence");
        };
        // C4 survives, the stray brace and its run up to the comma are
        // skipped, F4 resumes.
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn node_spans_enclose_their_children() {
        let (items, _) = parse_source("[1:3]C4,{3:4}D4 E4 F4,G4@A4,");
        fn check(node: &Node) {
            let span = node.span();
            let children: Vec<&Node> = match node {
                Node::Root { items, .. }
                | Node::Sequence { items, .. }
                | Node::Group { items, .. } => items.iter().collect(),
                Node::DurationScope { children, .. } | Node::Quantize { children, .. } => {
                    children.iter().collect()
                }
                Node::Chord { voices, .. } => voices.iter().collect(),
                Node::Chain { from, to, .. } => vec![from.as_ref(), to.as_ref()],
                Node::MacroDef { body, .. } | Node::GhostLine { body, .. } => vec![body.as_ref()],
                _ => Vec::new(),
            };
            for child in children {
                let c = child.span();
                assert!(span.from <= c.from && c.to <= span.to, "{:?} not inside {:?}", c, span);
                check(child);
            }
        }
        for item in &items {
            check(item);
        }
    }
}
