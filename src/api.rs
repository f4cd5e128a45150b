//! Host-facing operations: the surface a caller (CLI, editor plugin,
//! anything driving the compiler) actually calls. One function per host
//! operation, plain `Result<T, SymiError>`, immutable reads of the cached
//! snapshot; the only side effect on this surface is `export_midi`'s file
//! write.

use crate::diagnostics::Diagnostic;
use crate::error::{Result, SymiError};
use crate::midi::{self, MidiExportOptions};
use crate::resolve::Event;
use crate::session;
use crate::token::Token;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Recompiles `file_id`'s full pipeline against `source` and installs it as
/// that file's current snapshot.
pub fn file_update(file_id: &str, source: &str) {
    session::file_update(file_id, source);
}

pub fn file_close(file_id: &str) {
    session::file_close(file_id);
}

pub fn get_tokens(file_id: &str) -> Result<Arc<Vec<Token>>> {
    session::get_tokens(file_id).ok_or_else(|| SymiError::UnknownFile(file_id.to_string()))
}

pub fn get_ast(file_id: &str) -> Result<Arc<crate::ast::Node>> {
    session::get_ast(file_id).ok_or_else(|| SymiError::UnknownFile(file_id.to_string()))
}

pub fn get_diagnostics(file_id: &str) -> Result<Arc<Vec<Diagnostic>>> {
    session::get_diagnostics(file_id).ok_or_else(|| SymiError::UnknownFile(file_id.to_string()))
}

pub fn get_events(file_id: &str) -> Result<Arc<Vec<Event>>> {
    session::get_events(file_id).ok_or_else(|| SymiError::UnknownFile(file_id.to_string()))
}

/// Installs `source` as `file_id`'s current version, then checks whether
/// its events could be exported under `options` without writing anything.
pub fn validate_midi_export(file_id: &str, source: &str, options: &MidiExportOptions) -> Result<()> {
    session::file_update(file_id, source);
    let events = get_events(file_id)?;
    midi::validate_export(&events, options)
}

/// Installs `source` as `file_id`'s current version, builds a Standard
/// MIDI File for its events, and writes it to `path`, atomically: the file
/// is assembled fully in memory, written to a sibling temp path, then
/// renamed into place, so a reader never observes a partially-written file
/// and a failed export never clobbers whatever was previously at `path`.
pub fn export_midi(file_id: &str, source: &str, path: &Path, options: &MidiExportOptions) -> Result<()> {
    session::file_update(file_id, source);
    let events = get_events(file_id)?;
    let bytes = midi::export_to_smf(&events, options)?;

    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    log::info!("exported MIDI for '{}' to {}", file_id, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_file_reads_fail_clean() {
        let err = get_tokens("never-updated.symi").unwrap_err();
        assert!(matches!(err, SymiError::UnknownFile(_)));
    }

    #[test]
    fn full_round_trip_through_export() {
        let id = "api-round-trip.symi";
        let source = "(120)\nC4,D4,E4,F4,";
        file_update(id, source);
        assert!(!get_diagnostics(id).unwrap().iter().any(|d| d.severity == crate::diagnostics::Severity::Error));
        assert!(get_events(id).unwrap().len() >= 4);

        let dir = tempdir().unwrap();
        let out_path = dir.path().join("song.mid");
        let options = MidiExportOptions::default();
        validate_midi_export(id, source, &options).unwrap();
        export_midi(id, source, &out_path, &options).unwrap();
        assert!(out_path.exists());
        let bytes = std::fs::read(&out_path).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");

        file_close(id);
    }
}
