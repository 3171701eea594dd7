//! SHA-256 content hashing.
//!
//! The archive is keyed entirely by the hex digest produced here; every
//! other component treats it as an opaque identity for a file body.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Sequential read chunk size used by [`hash_file`].
pub const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("IO error hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path, source: io::Error) -> HashError {
    HashError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Hash the full contents of `path`, reading sequentially in [`CHUNK_SIZE`]
/// chunks, and return the lowercase hex SHA-256 digest.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fast-path partial hash: for files larger than three chunks, hash only the
/// first chunk, the middle chunk, and the last chunk. Reserved for a future
/// metadata-only comparison pass; the backup reconciler does not call this
/// today and relies on [`hash_file`] for any file that needs hashing.
pub fn hash_file_partial(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let size = file
        .metadata()
        .map_err(|e| io_err(path, e))?
        .len();
    let chunk = CHUNK_SIZE as u64;

    let mut hasher = Sha256::new();
    if size <= 3 * chunk {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| io_err(path, e))?;
        hasher.update(&buf);
        return Ok(hex::encode(hasher.finalize()));
    }

    let offsets = [0u64, (size - chunk) / 2, size - chunk];
    let mut buf = vec![0u8; CHUNK_SIZE];
    for off in offsets {
        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(off)).map_err(|e| io_err(path, e))?;
        let mut read_total = 0usize;
        while read_total < buf.len() {
            let n = file
                .read(&mut buf[read_total..])
                .map_err(|e| io_err(path, e))?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        hasher.update(&buf[..read_total]);
    }
    Ok(hex::encode(hasher.finalize()))
}
