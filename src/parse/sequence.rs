//! Sequence/chord/atom grammar: the bulk of the parser.
//!
//! `Sequence := Item (',' Item)*`, `Item := Chord | Atom`. `Chord.voices`
//! are full `Sequence`s rather than single-beat atom runs, since a macro
//! voice and a plain comma-separated voice must be able to run in
//! parallel for several beats each; `;` therefore separates whole
//! sequences at any level a chord can appear, not just within one item.
//!
//! Concatenated atoms with no comma between them (more than one atom
//! inside a single comma-delimited item) are represented as a `Group`, the
//! same node used for parenthesized rhythm groups; the resolver treats
//! both identically (split the current unit equally).

use crate::ast::{Node, Origin};
use crate::parse::{chain_node, parse_duration_fraction_value, LineParser};
use crate::token::TokenKind;

pub fn parse_top_level_sequence(p: &mut LineParser) -> Node {
    if p.peek_kind() == Some(TokenKind::Identifier) && p.peek_at(1).map(|t| t.kind) == Some(TokenKind::Colon) {
        let call_tok = p.advance().unwrap();
        let name = p.text(call_tok).to_string();
        let call_span = call_tok.span();
        p.advance(); // colon
        let voice1 = Node::Sequence {
            items: vec![Node::MacroCall { name, span: call_span }],
            span: call_span,
        };
        let voice2 = parse_sequence_with_voices(p);
        let span = call_span.cover(voice2.span());
        return Node::Chord {
            voices: vec![voice1, voice2],
            span,
        };
    }
    parse_sequence_with_voices(p)
}

fn parse_sequence_with_voices(p: &mut LineParser) -> Node {
    let first = parse_sequence_until(p, TokenKind::Semicolon);
    if p.peek_kind() != Some(TokenKind::Semicolon) {
        return first;
    }
    let mut voices = vec![first];
    while p.eat(TokenKind::Semicolon).is_some() {
        voices.push(parse_sequence_until(p, TokenKind::Semicolon));
    }
    let span = voices[0].span().cover(voices.last().unwrap().span());
    Node::Chord { voices, span }
}

/// Parses a comma-separated `Sequence`, stopping before `stop` or `)`/end
/// of line, whichever comes first.
fn parse_sequence_until(p: &mut LineParser, stop: TokenKind) -> Node {
    let start_span = p.peek().map(|t| t.span());
    let mut items = Vec::new();
    loop {
        match p.peek_kind() {
            None => break,
            Some(k) if k == stop || k == TokenKind::RParen => break,
            Some(TokenKind::Comma) => {
                p.diags.warning("empty sequence item", p.peek().unwrap().span());
                p.advance();
                continue;
            }
            _ => {}
        }
        match parse_item(p) {
            Some(item) => items.push(item),
            None => {
                let span = p.current_span();
                p.diags.error("unexpected token in sequence", span);
                p.advance();
                p.synchronize();
                p.eat(TokenKind::Comma);
                continue;
            }
        }
        if p.eat(TokenKind::Comma).is_none() {
            break;
        }
    }
    let span = match (start_span, items.last().map(|n: &Node| n.span())) {
        (Some(s), Some(e)) => s.cover(e),
        (Some(s), None) => s,
        (None, _) => p.last_span(),
    };
    Node::Sequence { items, span }
}

fn parse_item(p: &mut LineParser) -> Option<Node> {
    let atoms = parse_atom_seq(p);
    match atoms.len() {
        0 => None,
        1 => atoms.into_iter().next(),
        _ => {
            let span = atoms[0].span().cover(atoms.last().unwrap().span());
            Some(Node::Group { items: atoms, span })
        }
    }
}

fn parse_atom_seq(p: &mut LineParser) -> Vec<Node> {
    let mut atoms = Vec::new();
    while let Some(atom) = try_parse_atom(p) {
        atoms.push(atom);
    }
    atoms
}

fn is_pitch_literal_kind(k: TokenKind) -> bool {
    matches!(
        k,
        TokenKind::PitchFrequency
            | TokenKind::PitchRatio
            | TokenKind::PitchEdo
            | TokenKind::PitchCents
            | TokenKind::PitchSpellSimple
            | TokenKind::PitchSpellOctave
    )
}

fn try_parse_atom(p: &mut LineParser) -> Option<Node> {
    match p.peek_kind()? {
        TokenKind::DurationFraction => Some(parse_duration_scope(p)),
        TokenKind::DurationCommas => Some(parse_comma_duration(p)),
        TokenKind::Quantize => Some(parse_quantize(p)),
        TokenKind::LParen => Some(parse_group(p)),
        TokenKind::PitchRest => {
            let tok = p.advance().unwrap();
            let count = p.text(tok).chars().count() as u32;
            Some(Node::Rest {
                count,
                span: tok.span(),
                origin: Origin::Direct,
            })
        }
        TokenKind::PitchSustain => {
            let tok = p.advance().unwrap();
            Some(Node::Sustain {
                span: tok.span(),
                origin: Origin::Direct,
            })
        }
        TokenKind::Identifier => {
            let tok = p.advance().unwrap();
            Some(Node::MacroCall {
                name: p.text(tok).to_string(),
                span: tok.span(),
            })
        }
        k if is_pitch_literal_kind(k) => Some(parse_chain_or_pitch(p)),
        _ => None,
    }
}

fn parse_chain_or_pitch(p: &mut LineParser) -> Node {
    let tok = p.advance().unwrap();
    let pitch = super::parse_pitch_literal(tok.kind, p.text(tok));
    let note = Node::Note {
        pitch,
        span: tok.span(),
        origin: Origin::Direct,
    };
    if p.eat(TokenKind::At).is_none() {
        return note;
    }
    match parse_chain_operand(p) {
        Some(rhs) => {
            let span = note.span().cover(rhs.span());
            chain_node(note, rhs, span)
        }
        None => {
            p.diags.error("expected pitch after '@'", p.current_span());
            note
        }
    }
}

fn parse_chain_operand(p: &mut LineParser) -> Option<Node> {
    match p.peek_kind() {
        Some(k) if is_pitch_literal_kind(k) => Some(parse_chain_or_pitch(p)),
        _ => None,
    }
}

fn parse_duration_scope(p: &mut LineParser) -> Node {
    let tok = p.advance().unwrap();
    let duration = parse_duration_fraction_value(p.text(tok));
    let child = try_parse_atom(p);
    let span = match &child {
        Some(c) => tok.span().cover(c.span()),
        None => {
            p.diags.warning("duration scope has no following atom", tok.span());
            tok.span()
        }
    };
    Node::DurationScope {
        duration,
        children: child.into_iter().collect(),
        span,
    }
}

fn parse_comma_duration(p: &mut LineParser) -> Node {
    let tok = p.advance().unwrap();
    let text = p.text(tok);
    let comma_count = text[1..text.len() - 1].chars().filter(|&c| c == ',').count() as u32;
    Node::CommaDuration {
        comma_count,
        span: tok.span(),
    }
}

fn parse_quantize(p: &mut LineParser) -> Node {
    let tok = p.advance().unwrap();
    let text = p.text(tok);
    let inner = &text[1..text.len() - 1];
    let mut parts = inner.splitn(2, ':');
    let n: i64 = parts.next().unwrap_or("1").parse().unwrap_or(1);
    // `{n}` splits the beat into n parts and uses all of them.
    let m: i64 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(n);
    let children = parse_atom_seq(p);
    let span = match children.last() {
        Some(c) => tok.span().cover(c.span()),
        None => {
            p.diags.warning("quantize group has no atoms", tok.span());
            tok.span()
        }
    };
    Node::Quantize {
        n,
        m: m.max(1),
        children,
        span,
    }
}

fn parse_group(p: &mut LineParser) -> Node {
    let lparen = p.advance().unwrap();
    let inner = parse_sequence_until(p, TokenKind::RParen);
    let items = match inner {
        Node::Sequence { items, .. } => items,
        other => vec![other],
    };
    let rparen_span = p
        .eat(TokenKind::RParen)
        .map(|t| t.span())
        .unwrap_or_else(|| {
            p.diags.error("unclosed group", lparen.span());
            p.last_span()
        });
    let span = lparen.span().cover(rparen_span);
    Node::Group { items, span }
}
