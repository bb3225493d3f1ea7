// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-turn backup/undo store. Before the first fs-mutating operation on a
//! path within a turn, its original bytes (or the fact that it didn't exist)
//! are captured here so `undo_turn` can restore the session to its pre-turn
//! state regardless of how many times the path was rewritten afterward.
//!
//! Orthogonal to git: this exists so a turn can be rolled back even in a
//! directory that isn't a git repository, or for files git doesn't track.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Original {
    /// The path held these bytes before the turn touched it.
    Bytes(Vec<u8>),
    /// The path did not exist before the turn created it.
    Tombstone,
}

#[derive(Debug, Clone)]
enum Entry {
    Write(Original),
    /// The path was renamed from `from`; restoring means moving it back.
    Rename { from: PathBuf },
}

#[derive(Default)]
pub struct FileVault {
    // (turn_id, path) -> first-observed original state
    entries: Mutex<HashMap<(String, PathBuf), Entry>>,
}

impl FileVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the pre-mutation state of `path` for `turn_id`, if this is the
    /// first time this turn touches `path`. Subsequent calls for the same
    /// `(turn_id, path)` are no-ops, preserving the original captured state.
    pub fn capture_before_write(&self, turn_id: &str, path: &Path) -> std::io::Result<()> {
        let key = (turn_id.to_string(), path.to_path_buf());
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&key) {
            return Ok(());
        }
        let original = match std::fs::read(path) {
            Ok(bytes) => Original::Bytes(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Original::Tombstone,
            Err(e) => return Err(e),
        };
        entries.insert(key, Entry::Write(original));
        Ok(())
    }

    /// Record that `path` is about to be deleted (same capture as a write —
    /// the original bytes are what `undo_turn` restores).
    pub fn capture_before_delete(&self, turn_id: &str, path: &Path) -> std::io::Result<()> {
        self.capture_before_write(turn_id, path)
    }

    /// Record that `path` is being renamed from `from` within this turn.
    pub fn record_rename(&self, turn_id: &str, from: &Path, to: &Path) {
        let key = (turn_id.to_string(), to.to_path_buf());
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key).or_insert(Entry::Rename { from: from.to_path_buf() });
    }

    /// Restore every path touched in `turn_id` to its pre-turn state in a
    /// single traversal: bytes are written back, tombstoned creations are
    /// deleted, and renames are reversed.
    pub fn undo_turn(&self, turn_id: &str) -> std::io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let keys: Vec<(String, PathBuf)> = entries
            .keys()
            .filter(|(t, _)| t == turn_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(entry) = entries.remove(&key) {
                let path = &key.1;
                match entry {
                    Entry::Write(Original::Bytes(bytes)) => {
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(path, bytes)?;
                    }
                    Entry::Write(Original::Tombstone) => {
                        let _ = std::fs::remove_file(path);
                    }
                    Entry::Rename { from } => {
                        if path.exists() {
                            std::fs::rename(path, &from)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_restores_overwritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "original").unwrap();

        let vault = FileVault::new();
        vault.capture_before_write("turn-1", &path).unwrap();
        std::fs::write(&path, "changed").unwrap();
        vault.capture_before_write("turn-1", &path).unwrap(); // no-op, already captured

        vault.undo_turn("turn-1").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn undo_deletes_file_created_this_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.txt");

        let vault = FileVault::new();
        vault.capture_before_write("turn-1", &path).unwrap(); // captures tombstone
        std::fs::write(&path, "brand new").unwrap();

        vault.undo_turn("turn-1").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn second_mutation_same_turn_does_not_overwrite_captured_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1").unwrap();

        let vault = FileVault::new();
        vault.capture_before_write("turn-1", &path).unwrap();
        std::fs::write(&path, "v2").unwrap();
        vault.capture_before_write("turn-1", &path).unwrap();
        std::fs::write(&path, "v3").unwrap();

        vault.undo_turn("turn-1").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
    }

    #[test]
    fn undo_reverses_rename() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("old.txt");
        let to = dir.path().join("new.txt");
        std::fs::write(&from, "data").unwrap();
        std::fs::rename(&from, &to).unwrap();

        let vault = FileVault::new();
        vault.record_rename("turn-1", &from, &to);
        vault.undo_turn("turn-1").unwrap();

        assert!(from.exists());
        assert!(!to.exists());
    }

    #[test]
    fn undo_is_scoped_to_its_own_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "keep").unwrap();

        let vault = FileVault::new();
        vault.capture_before_write("turn-a", &path).unwrap();
        std::fs::write(&path, "changed-by-a").unwrap();

        vault.undo_turn("turn-b").unwrap(); // different turn, should not touch anything
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "changed-by-a");
    }
}
