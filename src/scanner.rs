//! Recursive directory walk producing per-file metadata records.
//!
//! Symlinks are never followed: a symlink entry is skipped outright rather
//! than hashed through to its target, so the walk cannot cycle and a
//! symlink never silently stands in for a regular file.

use crate::hasher::{self, HashError};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error walking {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// One observed filesystem object.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub inode: u64,
    pub mtime: f64,
    pub size: u64,
    pub checksum: Option<String>,
}

impl FileInfo {
    /// `path` rendered as a forward-slash string, for durable persistence.
    pub fn normalized_path(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    fn from_entry(path: &Path) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(FileInfo {
            path: path.to_path_buf(),
            inode: meta.ino(),
            mtime,
            size: meta.size(),
            checksum: None,
        })
    }
}

/// Recursively scan every `root` for regular files, skipping symlinks.
///
/// When `with_checksum` is true, every returned [`FileInfo`] carries its
/// SHA-256 digest; otherwise `checksum` is left `None` for the caller to
/// fill in via the fast-path/hash pipeline.
pub fn scan(roots: &[PathBuf], with_checksum: bool) -> Result<Vec<FileInfo>, ScanError> {
    let mut out = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| ScanError::Walk {
                path: root.display().to_string(),
                source: io::Error::new(io::ErrorKind::Other, e),
            })?;
            // `file_type()` here reflects the directory entry itself, not a
            // symlink's target, because `follow_links(false)` leaves the
            // entry's own type untouched.
            if !entry.file_type().is_file() {
                continue;
            }
            let mut info = FileInfo::from_entry(entry.path()).map_err(|e| ScanError::Walk {
                path: entry.path().display().to_string(),
                source: e,
            })?;
            if with_checksum {
                info.checksum = Some(hasher::hash_file(entry.path())?);
            }
            out.push(info);
        }
    }
    Ok(out)
}
