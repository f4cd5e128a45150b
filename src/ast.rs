//! AST node and pitch-literal definitions.
//!
//! Pitch literals are a parsed-but-unresolved form: the parser decides
//! *which kind* of pitch a token spells out, the resolver later turns
//! that into Hz. What was written and what it sounds as stay separate
//! until resolution.

use crate::rational::Rational;
use crate::span::Span;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Pitch {
    Rest(u32),
    Sustain,
    Frequency(f64),
    Ratio(i64, i64),
    Edo(i64, i64),
    Cents(f64),
    Spell {
        letter: char,
        accidentals: i32,
        octave: Option<i32>,
        micro_offset: i32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChainKind {
    Chain,
}

/// Where a node's origin information comes from: written directly at this
/// point in the source, or materialized from a macro body by `expand`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    Direct,
    Expanded { call_span: Span },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Root {
        items: Vec<Node>,
        span: Span,
    },
    MacroDef {
        name: String,
        has_relative_marker: bool,
        body: Box<Node>,
        span: Span,
    },
    GhostLine {
        body: Box<Node>,
        span: Span,
    },
    ControlTimeSig {
        num: i64,
        den: i64,
        span: Span,
    },
    ControlBpm {
        beat_fraction: Option<Rational>,
        bpm: f64,
        span: Span,
    },
    ControlBaseFreq {
        items: Vec<(Option<Pitch>, Pitch)>,
        span: Span,
    },
    Note {
        pitch: Pitch,
        span: Span,
        origin: Origin,
    },
    Rest {
        count: u32,
        span: Span,
        origin: Origin,
    },
    Sustain {
        span: Span,
        origin: Origin,
    },
    DurationScope {
        duration: Rational,
        children: Vec<Node>,
        span: Span,
    },
    CommaDuration {
        comma_count: u32,
        span: Span,
    },
    Quantize {
        n: i64,
        m: i64,
        children: Vec<Node>,
        span: Span,
    },
    MacroCall {
        name: String,
        span: Span,
    },
    Chord {
        voices: Vec<Node>,
        span: Span,
    },
    Sequence {
        items: Vec<Node>,
        span: Span,
    },
    Chain {
        kind: ChainKind,
        from: Box<Node>,
        to: Box<Node>,
        span: Span,
        origin: Origin,
    },
    Group {
        items: Vec<Node>,
        span: Span,
    },
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Root { span, .. }
            | Node::MacroDef { span, .. }
            | Node::GhostLine { span, .. }
            | Node::ControlTimeSig { span, .. }
            | Node::ControlBpm { span, .. }
            | Node::ControlBaseFreq { span, .. }
            | Node::Note { span, .. }
            | Node::Rest { span, .. }
            | Node::Sustain { span, .. }
            | Node::DurationScope { span, .. }
            | Node::CommaDuration { span, .. }
            | Node::Quantize { span, .. }
            | Node::MacroCall { span, .. }
            | Node::Chord { span, .. }
            | Node::Sequence { span, .. }
            | Node::Chain { span, .. }
            | Node::Group { span, .. } => *span,
        }
    }
}
