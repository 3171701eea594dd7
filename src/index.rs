//! The archive index: active/history catalog of content-unique blobs, with
//! atomic, self-validating durable persistence.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("archive index at {path} is corrupt: {reason}")]
    DataCorruption { path: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveFilePointer {
    pub path: String,
    pub ino: u64,
    pub mtime: f64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogEventKind {
    #[serde(rename = "ADDED")]
    Added,
    #[serde(rename = "REMOVED")]
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveLogEvent {
    pub timestamp: String,
    pub event: LogEventKind,
    pub path: Option<String>,
}

impl ArchiveLogEvent {
    pub fn new(event: LogEventKind, path: Option<String>) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            event,
            path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveEntry {
    pub checksum: String,
    pub fptrs: Vec<ArchiveFilePointer>,
    pub log: Vec<ArchiveLogEvent>,
    pub arch_size: u64,
}

impl ArchiveEntry {
    pub fn from_checksum(checksum: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            fptrs: Vec::new(),
            log: Vec::new(),
            arch_size: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OnDisk {
    active: Vec<ArchiveEntry>,
    history: Vec<ArchiveEntry>,
}

/// In-memory archive catalog plus its durable on-disk counterpart.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    pub active: HashMap<String, ArchiveEntry>,
    pub history: HashMap<String, ArchiveEntry>,
    /// Derived: inode -> checksum, for the fast metadata-match path.
    pub ino_index: HashMap<u64, String>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rebuild_ino_index(&mut self) {
        self.ino_index.clear();
        for (cs, entry) in &self.active {
            for fptr in &entry.fptrs {
                self.ino_index.insert(fptr.ino, cs.clone());
            }
        }
    }

    /// Load the index from `table_dir/archive.json`. Absence of the file is
    /// not an error: the index starts empty.
    pub fn load(table_dir: &Path) -> Result<Self, IndexError> {
        let path = archive_json_path(table_dir);
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = fs::read_to_string(&path)?;
        let on_disk: OnDisk = serde_json::from_str(&contents).map_err(|e| {
            IndexError::DataCorruption {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let mut index = Self {
            active: on_disk
                .active
                .into_iter()
                .map(|e| (e.checksum.clone(), e))
                .collect(),
            history: on_disk
                .history
                .into_iter()
                .map(|e| (e.checksum.clone(), e))
                .collect(),
            ino_index: HashMap::new(),
        };
        index.rebuild_ino_index();
        Ok(index)
    }

    /// Insert or replace an active entry, overwriting any stale history
    /// entry under the same checksum (resurrection).
    pub fn put_active(&mut self, entry: ArchiveEntry) {
        self.history.remove(&entry.checksum);
        for fptr in &entry.fptrs {
            self.ino_index.insert(fptr.ino, entry.checksum.clone());
        }
        self.active.insert(entry.checksum.clone(), entry);
    }

    /// Move an active entry to history: clear its fptrs, drop its inode
    /// entries, and leave the log events (already appended by the caller)
    /// intact.
    pub fn retire_to_history(&mut self, checksum: &str) {
        if let Some(mut entry) = self.active.remove(checksum) {
            for fptr in &entry.fptrs {
                self.ino_index.remove(&fptr.ino);
            }
            entry.fptrs.clear();
            self.history.insert(checksum.to_string(), entry);
        }
    }

    /// Persist the index to `table_dir/archive.json`, following the
    /// copy-then-validate protocol: back up the previous file, write the
    /// new one, re-read it to confirm it parses, and on failure restore
    /// the backup and stash the bad write for forensics.
    pub fn persist(&self, table_dir: &Path) -> Result<(), IndexError> {
        let on_disk = OnDisk {
            active: self.active.values().cloned().collect(),
            history: self.history.values().cloned().collect(),
        };
        let serialized = serde_json::to_string_pretty(&on_disk)?;
        self.persist_serialized(table_dir, &serialized)
    }

    /// Write `serialized` to `table_dir/archive.json` via the copy/write/
    /// re-read-validate protocol. Split out from [`Self::persist`] so the
    /// validate/restore branch can be exercised directly with a
    /// deliberately unparsable payload.
    fn persist_serialized(&self, table_dir: &Path, serialized: &str) -> Result<(), IndexError> {
        fs::create_dir_all(table_dir)?;
        let path = archive_json_path(table_dir);
        let backup_path = path.with_extension("json.bak");
        let failed_path = path.with_extension("json.failed");

        if path.exists() {
            fs::copy(&path, &backup_path)?;
        }

        fs::write(&path, serialized)?;

        let reread = fs::read_to_string(&path)?;
        if serde_json::from_str::<OnDisk>(&reread).is_err() {
            fs::copy(&path, &failed_path)?;
            if backup_path.exists() {
                fs::copy(&backup_path, &path)?;
            }
            return Err(IndexError::DataCorruption {
                path: path.display().to_string(),
                reason: "rewritten archive.json failed to re-parse".to_string(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn persist_raw(&self, table_dir: &Path, serialized: &str) -> Result<(), IndexError> {
        self.persist_serialized(table_dir, serialized)
    }
}

fn archive_json_path(table_dir: &Path) -> PathBuf {
    table_dir.join("archive.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_entry(cs: &str, path: &str, ino: u64) -> ArchiveEntry {
        let mut e = ArchiveEntry::from_checksum(cs);
        e.fptrs.push(ArchiveFilePointer {
            path: path.to_string(),
            ino,
            mtime: 1.0,
            size: 5,
        });
        e.log.push(ArchiveLogEvent::new(
            LogEventKind::Added,
            Some(path.to_string()),
        ));
        e.arch_size = 42;
        e
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let idx = ArchiveIndex::load(dir.path()).unwrap();
        assert!(idx.active.is_empty());
        assert!(idx.history.is_empty());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut idx = ArchiveIndex::new();
        idx.put_active(sample_entry("abc123", "a.txt", 7));
        idx.persist(dir.path()).unwrap();

        let reloaded = ArchiveIndex::load(dir.path()).unwrap();
        assert_eq!(reloaded.active.len(), 1);
        assert_eq!(reloaded.ino_index.get(&7), Some(&"abc123".to_string()));
    }

    #[test]
    fn retire_clears_fptrs_and_ino_index() {
        let dir = tempdir().unwrap();
        let mut idx = ArchiveIndex::new();
        idx.put_active(sample_entry("abc123", "a.txt", 7));
        idx.retire_to_history("abc123");
        assert!(idx.active.is_empty());
        assert!(idx.ino_index.is_empty());
        let hist = idx.history.get("abc123").unwrap();
        assert!(hist.fptrs.is_empty());
        idx.persist(dir.path()).unwrap();
    }

    #[test]
    fn resurrection_removes_from_history() {
        let mut idx = ArchiveIndex::new();
        idx.put_active(sample_entry("abc123", "a.txt", 7));
        idx.retire_to_history("abc123");
        assert!(idx.history.contains_key("abc123"));
        idx.put_active(sample_entry("abc123", "a.txt", 8));
        assert!(idx.active.contains_key("abc123"));
        assert!(!idx.history.contains_key("abc123"));
    }

    #[test]
    fn persist_restores_backup_on_corruption() {
        let dir = tempdir().unwrap();
        let path = archive_json_path(dir.path());

        // First, a real successful persist establishes the "good" state
        // that a later failed persist must roll back to.
        let mut idx = ArchiveIndex::new();
        idx.put_active(sample_entry("abc123", "a.txt", 7));
        idx.persist(dir.path()).unwrap();
        let good_contents = fs::read_to_string(&path).unwrap();
        assert!(good_contents.contains("abc123"));

        // Now force persist()'s own write-then-reread-then-validate branch
        // to fail, by handing it a payload that will not re-parse as
        // `OnDisk` once written. This drives the exact production code
        // path at index.rs's validate/restore block, not a simulation of
        // it.
        idx.put_active(sample_entry("def456", "b.txt", 9));
        let err = idx.persist_raw(dir.path(), "{ this is not valid json").unwrap_err();
        assert!(matches!(err, IndexError::DataCorruption { .. }));

        // archive.json must be rolled back to the pre-call (good) contents.
        let restored_contents = fs::read_to_string(&path).unwrap();
        assert_eq!(restored_contents, good_contents);

        // The bad write must be preserved for forensics.
        let failed_path = path.with_extension("json.failed");
        assert!(failed_path.exists());
        let failed_contents = fs::read_to_string(&failed_path).unwrap();
        assert_eq!(failed_contents, "{ this is not valid json");
    }
}
