//! Macro expander: `expand(root) -> (root', diagnostics)` with every
//! `MacroCall` eliminated.
//!
//! Definitions are resolved lexically (most recent definition strictly
//! before the call, matching document order), and a macro body's own
//! nested calls are expanded once, at definition time, against whatever
//! definitions were already in scope: ordinary lexical scoping rather
//! than resolving at every call site. A small explicit call-stack
//! (`Expander::stack`) is the only structure needed for cycle detection,
//! no separate call-graph.
//!
//! Every time a call is inlined, every `Note`/`Rest`/`Sustain`/`Chain` leaf
//! in the copied body is re-tagged with `Origin::Expanded{call_span}` for
//! *this* call, overwriting whatever tag it carried from a previous,
//! inner expansion. Because outer calls are always inlined after their
//! nested calls were pre-expanded at definition time, the last (outermost)
//! tag applied wins, and only the outermost invocation site matters for
//! click-to-play. No extra bookkeeping.
//!
//! `name()` and `name` are treated identically for timing purposes (both
//! inline the body and advance the calling sequence's cursor by the
//! body's total duration); the relative-marker flag is preserved on the
//! definition but does not change resolution.

use crate::ast::{Node, Origin};
use crate::diagnostics::Diagnostics;
use crate::span::Span;
use std::collections::HashMap;

#[derive(Clone)]
struct MacroDefInfo {
    body: Node,
    #[allow(dead_code)]
    has_relative_marker: bool,
}

struct Expander<'d> {
    defs: HashMap<String, MacroDefInfo>,
    diags: &'d mut Diagnostics,
    stack: Vec<String>,
}

pub fn expand(root: Node) -> (Node, Diagnostics) {
    let mut diags = Diagnostics::new();
    let expanded = {
        let mut expander = Expander {
            defs: HashMap::new(),
            diags: &mut diags,
            stack: Vec::new(),
        };
        expander.expand_root(root)
    };
    (expanded, diags)
}

impl<'d> Expander<'d> {
    fn expand_root(&mut self, root: Node) -> Node {
        let Node::Root { items, span } = root else {
            return self.expand_subtree(root);
        };
        let mut out = Vec::with_capacity(items.len());
        // Name of the macro a ghost line would attach to: set by a
        // definition, carried across consecutive ghost lines, cleared by
        // anything else.
        let mut open_def: Option<String> = None;
        for item in items {
            match item {
                Node::MacroDef {
                    name,
                    has_relative_marker,
                    body,
                    span: def_span,
                } => {
                    self.stack.push(name.clone());
                    let expanded_body = self.expand_subtree(*body);
                    self.stack.pop();
                    self.defs.insert(
                        name.clone(),
                        MacroDefInfo {
                            body: expanded_body,
                            has_relative_marker,
                        },
                    );
                    log::debug!("macro '{}' defined at {:?}", name, def_span);
                    open_def = Some(name);
                }
                Node::GhostLine { body, span: ghost_span } if open_def.is_some() => {
                    // A ghost line under a macro definition layers its body
                    // into the definition as a voice starting at the body's
                    // own start, so every later call plays both together.
                    let name = open_def.clone().unwrap();
                    self.stack.push(name.clone());
                    let ghost_body = self.expand_subtree(*body);
                    self.stack.pop();
                    let info = self.defs.get_mut(&name).unwrap();
                    let combined_span = info.body.span().cover(ghost_span);
                    let prev = std::mem::replace(
                        &mut info.body,
                        Node::Sequence { items: Vec::new(), span: ghost_span },
                    );
                    info.body = Node::Chord {
                        voices: vec![prev, ghost_body],
                        span: combined_span,
                    };
                }
                Node::GhostLine { body, span: ghost_span } => {
                    out.push(Node::GhostLine {
                        body: Box::new(self.expand_subtree(*body)),
                        span: ghost_span,
                    });
                }
                other => {
                    open_def = None;
                    out.push(self.expand_subtree(other));
                }
            }
        }
        Node::Root { items: out, span }
    }

    fn expand_subtree(&mut self, node: Node) -> Node {
        match node {
            Node::MacroCall { name, span } => self.expand_call(&name, span),
            Node::GhostLine { body, span } => Node::GhostLine {
                body: Box::new(self.expand_subtree(*body)),
                span,
            },
            Node::DurationScope {
                duration,
                children,
                span,
            } => Node::DurationScope {
                duration,
                children: self.expand_children(children),
                span,
            },
            Node::Quantize { n, m, children, span } => Node::Quantize {
                n,
                m,
                children: self.expand_children(children),
                span,
            },
            Node::Chord { voices, span } => Node::Chord {
                voices: self.expand_children(voices),
                span,
            },
            Node::Sequence { items, span } => Node::Sequence {
                items: self.expand_children(items),
                span,
            },
            Node::Group { items, span } => Node::Group {
                items: self.expand_children(items),
                span,
            },
            Node::Chain {
                kind,
                from,
                to,
                span,
                origin,
            } => Node::Chain {
                kind,
                from: Box::new(self.expand_subtree(*from)),
                to: Box::new(self.expand_subtree(*to)),
                span,
                origin,
            },
            other => other,
        }
    }

    fn expand_children(&mut self, children: Vec<Node>) -> Vec<Node> {
        children.into_iter().map(|c| self.expand_subtree(c)).collect()
    }

    fn expand_call(&mut self, name: &str, call_span: Span) -> Node {
        if self.stack.iter().any(|n| n == name) {
            self.diags
                .error(format!("recursive macro call to '{}'", name), call_span);
            return Node::Sequence {
                items: Vec::new(),
                span: call_span,
            };
        }
        let Some(info) = self.defs.get(name).cloned() else {
            self.diags.error(format!("undefined macro '{}'", name), call_span);
            return Node::Sequence {
                items: Vec::new(),
                span: call_span,
            };
        };
        self.stack.push(name.to_string());
        let tagged = tag_origin(info.body, call_span);
        self.stack.pop();
        tagged
    }
}

fn tag_origin(node: Node, call_span: Span) -> Node {
    match node {
        Node::Note { pitch, span, .. } => Node::Note {
            pitch,
            span,
            origin: Origin::Expanded { call_span },
        },
        Node::Rest { count, span, .. } => Node::Rest {
            count,
            span,
            origin: Origin::Expanded { call_span },
        },
        Node::Sustain { span, .. } => Node::Sustain {
            span,
            origin: Origin::Expanded { call_span },
        },
        Node::Chain { kind, from, to, span, .. } => Node::Chain {
            kind,
            from: Box::new(tag_origin(*from, call_span)),
            to: Box::new(tag_origin(*to, call_span)),
            span,
            origin: Origin::Expanded { call_span },
        },
        Node::GhostLine { body, span } => Node::GhostLine {
            body: Box::new(tag_origin(*body, call_span)),
            span,
        },
        Node::DurationScope { duration, children, span } => Node::DurationScope {
            duration,
            children: children.into_iter().map(|c| tag_origin(c, call_span)).collect(),
            span,
        },
        Node::Quantize { n, m, children, span } => Node::Quantize {
            n,
            m,
            children: children.into_iter().map(|c| tag_origin(c, call_span)).collect(),
            span,
        },
        Node::Chord { voices, span } => Node::Chord {
            voices: voices.into_iter().map(|v| tag_origin(v, call_span)).collect(),
            span,
        },
        Node::Sequence { items, span } => Node::Sequence {
            items: items.into_iter().map(|i| tag_origin(i, call_span)).collect(),
            span,
        },
        Node::Group { items, span } => Node::Group {
            items: items.into_iter().map(|i| tag_origin(i, call_span)).collect(),
            span,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::token::tokenize;

    fn expand_source(source: &str) -> (Node, Diagnostics) {
        let (tokens, _) = tokenize(source);
        let (root, _) = parse(&tokens, source);
        expand(root)
    }

    #[test]
    fn undefined_macro_call_expands_empty_with_error() {
        let (_root, diags) = expand_source("x");
        assert!(diags.has_errors());
    }

    #[test]
    fn self_recursive_macro_expands_empty_with_error() {
        let (root, diags) = expand_source("x = x\nx");
        assert!(diags.has_errors());
        let Node::Root { items, .. } = root else { panic!() };
        // one item for the body-less call expansion
        assert_eq!(items.len(), 1);
    }

    fn count_notes(node: &Node) -> usize {
        match node {
            Node::Note { .. } => 1,
            Node::Root { items, .. }
            | Node::Sequence { items, .. }
            | Node::Group { items, .. } => items.iter().map(count_notes).sum(),
            Node::Chord { voices, .. } => voices.iter().map(count_notes).sum(),
            Node::DurationScope { children, .. } | Node::Quantize { children, .. } => {
                children.iter().map(count_notes).sum()
            }
            Node::GhostLine { body, .. } | Node::MacroDef { body, .. } => count_notes(body),
            _ => 0,
        }
    }

    #[test]
    fn ghost_line_under_a_definition_becomes_part_of_the_macro() {
        let (root, diags) = expand_source("lo = C4,D4\n= E4,F4\nlo");
        assert!(!diags.has_errors());
        let Node::Root { items, .. } = &root else { panic!() };
        assert_eq!(items.len(), 1);
        let Node::Sequence { items: outer, .. } = &items[0] else { panic!("expected sequence") };
        // The call inlines a chord: the definition line layered with its
        // ghost line.
        assert!(matches!(&outer[0], Node::Chord { .. }));
        assert_eq!(count_notes(&root), 4);
    }

    #[test]
    fn redefinition_shadows_and_the_new_body_sees_the_old_one() {
        let (root, diags) = expand_source("x = C4\nx = D4,x\nx");
        assert!(!diags.has_errors());
        // The second `x` body's own call resolved to the first definition,
        // so the final call plays D4 then C4.
        assert_eq!(count_notes(&root), 2);
    }

    #[test]
    fn forward_reference_is_undefined_at_definition_time() {
        let (_root, diags) = expand_source("a = b\nb = C4\na");
        assert!(diags.has_errors());
    }

    #[test]
    fn simple_macro_call_inlines_body_and_tags_origin() {
        let (root, diags) = expand_source("lo = C4,D4\nlo");
        assert!(!diags.has_errors());
        let Node::Root { items, .. } = root else { panic!() };
        assert_eq!(items.len(), 1);
        let Node::Sequence { items: outer, .. } = &items[0] else { panic!("expected sequence") };
        assert_eq!(outer.len(), 1);
        let Node::Sequence { items: inner, .. } = &outer[0] else { panic!("expected expanded body sequence") };
        for item in inner {
            match item {
                Node::Note { origin, .. } => {
                    assert!(matches!(origin, Origin::Expanded { .. }));
                }
                other => panic!("unexpected node {:?}", other),
            }
        }
    }
}
