//! Sharded on-disk layout for encrypted blob bodies.
//!
//! Every blob lives at `<file_dir>/<first two hex chars>/<checksum>.enc`,
//! keeping any one shard directory to roughly 1/256th of the archive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("checksum {0:?} is too short to shard")]
    ChecksumTooShort(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    file_dir: PathBuf,
}

impl BlobStore {
    pub fn new(file_dir: impl Into<PathBuf>) -> Self {
        Self {
            file_dir: file_dir.into(),
        }
    }

    /// Path at which `checksum`'s blob is or would be stored.
    pub fn archive_path(&self, checksum: &str) -> Result<PathBuf, BlobStoreError> {
        if checksum.len() < 2 {
            return Err(BlobStoreError::ChecksumTooShort(checksum.to_string()));
        }
        let shard = &checksum[..2];
        Ok(self.file_dir.join(shard).join(format!("{checksum}.enc")))
    }

    /// Create the shard directory for `checksum` if it doesn't exist.
    pub fn ensure_shard(&self, checksum: &str) -> Result<PathBuf, BlobStoreError> {
        let path = self.archive_path(checksum)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// True iff a blob for `checksum` exists on disk and its size matches
    /// `expected_size` exactly.
    pub fn exists_with_size(&self, checksum: &str, expected_size: u64) -> bool {
        match self.archive_path(checksum) {
            Ok(path) => match fs::metadata(&path) {
                Ok(meta) => meta.len() == expected_size,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Size in bytes of the on-disk blob for `checksum`.
    pub fn blob_size(&self, checksum: &str) -> Result<u64, BlobStoreError> {
        let path = self.archive_path(checksum)?;
        Ok(fs::metadata(path)?.len())
    }

    /// Remove the blob for `checksum`. Missing file is not an error.
    pub fn remove(&self, checksum: &str) -> Result<(), BlobStoreError> {
        let path = self.archive_path(checksum)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn file_dir(&self) -> &Path {
        &self.file_dir
    }
}
