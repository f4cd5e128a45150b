//! Byte-offset spans into a source buffer.
//!
//! Every token, AST node, diagnostic and event traces back to a half-open
//! `[from, to)` byte range in the original UTF-8 source. Spans are never
//! widened implicitly; a parent node's span is only as large as the union
//! of what it actually consumed.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub from: usize,
    pub to: usize,
}

impl Span {
    pub fn new(from: usize, to: usize) -> Self {
        debug_assert!(from <= to, "span from {} must not exceed to {}", from, to);
        Self { from, to }
    }

    pub fn at(pos: usize) -> Self {
        Self { from: pos, to: pos }
    }

    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Smallest span enclosing both `self` and `other`.
    pub fn cover(&self, other: Span) -> Span {
        Span::new(self.from.min(other.from), self.to.max(other.to))
    }

    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.from..self.to]
    }
}
