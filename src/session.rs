//! Session store: keeps the latest compiled snapshot per open file, keyed
//! by host-assigned `fileId`.
//!
//! A `once_cell::sync::Lazy<RwLock<HashMap<fileId, ..>>>` of per-file
//! slots: the outer `RwLock` is only ever held for the map-lookup itself,
//! so two files rebuild concurrently, while each file's own `Mutex`
//! serializes updates *to that file* into a strict total order, which is
//! what makes "last writer wins" trivially true rather than something
//! that needs comparing version numbers after the fact. Readers clone
//! `Arc`s out of the current snapshot and never block a rebuild.

use crate::ast::Node;
use crate::diagnostics::Diagnostic;
use crate::macros::expand;
use crate::parse::parse;
use crate::resolve::{resolve, Event};
use crate::token::{tokenize, Token};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub source_hash: u64,
    pub version: u64,
    pub tokens: Arc<Vec<Token>>,
    pub ast: Arc<Node>,
    pub diagnostics: Arc<Vec<Diagnostic>>,
    pub events: Arc<Vec<Event>>,
}

struct FileSlot {
    update_lock: Mutex<()>,
    current: RwLock<Option<Arc<SessionEntry>>>,
    next_version: AtomicU64,
}

impl FileSlot {
    fn new() -> Self {
        FileSlot {
            update_lock: Mutex::new(()),
            current: RwLock::new(None),
            next_version: AtomicU64::new(0),
        }
    }
}

static SESSIONS: Lazy<RwLock<HashMap<String, Arc<FileSlot>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn get_or_create_slot(file_id: &str) -> Arc<FileSlot> {
    if let Some(slot) = SESSIONS.read().unwrap().get(file_id) {
        return slot.clone();
    }
    SESSIONS
        .write()
        .unwrap()
        .entry(file_id.to_string())
        .or_insert_with(|| Arc::new(FileSlot::new()))
        .clone()
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Recompiles `fileId`'s pipeline end to end (lex -> parse -> expand ->
/// resolve) and installs the result as the file's current snapshot.
/// Concurrent calls for *different* `fileId`s proceed independently;
/// concurrent calls for the *same* `fileId` serialize on that file's own
/// lock, so the last one to acquire it is, unambiguously, the last writer.
pub fn file_update(file_id: &str, source: &str) -> Arc<SessionEntry> {
    let slot = get_or_create_slot(file_id);
    let _serialize = slot.update_lock.lock().unwrap();

    let (tokens, lex_diags) = tokenize(source);
    let (root, parse_diags) = parse(&tokens, source);
    let ast = Arc::new(root.clone());
    let (expanded, expand_diags) = expand(root);
    let (events, resolve_diags) = resolve(&expanded);

    let mut diagnostics = crate::diagnostics::Diagnostics::new();
    diagnostics.extend(lex_diags);
    diagnostics.extend(parse_diags);
    diagnostics.extend(expand_diags);
    diagnostics.extend(resolve_diags);
    if !diagnostics.0.is_empty() {
        log::warn!(
            "file '{}' rebuilt with {} diagnostic(s)",
            file_id,
            diagnostics.0.len()
        );
    }

    let version = slot.next_version.fetch_add(1, Ordering::SeqCst) + 1;
    let entry = Arc::new(SessionEntry {
        source_hash: source_hash(source),
        version,
        tokens: Arc::new(tokens),
        ast,
        diagnostics: Arc::new(diagnostics.into_vec()),
        events: Arc::new(events),
    });

    *slot.current.write().unwrap() = Some(entry.clone());
    log::info!(
        "file '{}' rebuilt at version {}: {} tokens, {} events",
        file_id,
        version,
        entry.tokens.len(),
        entry.events.len()
    );
    entry
}

pub fn get_entry(file_id: &str) -> Option<Arc<SessionEntry>> {
    SESSIONS
        .read()
        .unwrap()
        .get(file_id)?
        .current
        .read()
        .unwrap()
        .clone()
}

pub fn get_tokens(file_id: &str) -> Option<Arc<Vec<Token>>> {
    get_entry(file_id).map(|e| e.tokens.clone())
}

pub fn get_ast(file_id: &str) -> Option<Arc<Node>> {
    get_entry(file_id).map(|e| e.ast.clone())
}

pub fn get_diagnostics(file_id: &str) -> Option<Arc<Vec<Diagnostic>>> {
    get_entry(file_id).map(|e| e.diagnostics.clone())
}

pub fn get_events(file_id: &str) -> Option<Arc<Vec<Event>>> {
    get_entry(file_id).map(|e| e.events.clone())
}

pub fn file_close(file_id: &str) {
    if SESSIONS.write().unwrap().remove(file_id).is_some() {
        log::info!("file '{}' closed, snapshot dropped", file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn update_then_read_round_trips() {
        let id = "test-round-trip.symi";
        file_update(id, "(120)\nC4,D4,");
        let entry = get_entry(id).expect("entry present");
        assert!(entry.events.len() >= 2);
        file_close(id);
        assert!(get_entry(id).is_none());
    }

    #[test]
    fn concurrent_updates_to_distinct_files_do_not_block_each_other() {
        let ids: Vec<String> = (0..8).map(|i| format!("concurrent-{}.symi", i)).collect();
        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| thread::spawn(move || file_update(&id, "(120)\nC4,D4,E4,")))
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for id in &ids {
            assert!(get_entry(id).is_some());
            file_close(id);
        }
    }

    #[test]
    fn later_update_wins_for_same_file() {
        let id = "test-last-writer.symi";
        file_update(id, "(120)\nC4,");
        let first_version = get_entry(id).unwrap().version;
        file_update(id, "(120)\nC4,D4,");
        let second = get_entry(id).unwrap();
        assert!(second.version > first_version);
        file_close(id);
    }
}
