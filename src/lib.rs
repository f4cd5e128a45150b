//! Symi: a plain-text microtonal music notation language, compiled through
//! a lexer, a recursive-descent parser, a macro expander, an exact-rational
//! time resolver, and a MIDI emitter, with a per-file session store sitting
//! in front of the whole pipeline for hosts that keep files open across
//! edits.
//!
//! Module layout mirrors the pipeline itself: [`token`] -> [`parse`] ->
//! [`macros`] -> [`resolve`] -> [`midi`], with [`session`] and [`api`] as
//! the host-facing shell around it.

pub mod api;
pub mod ast;
pub mod diagnostics;
pub mod error;
pub mod macros;
pub mod midi;
pub mod parse;
pub mod rational;
pub mod resolve;
pub mod session;
pub mod span;
pub mod token;

pub use error::{Result, SymiError};
