// dbbackup/src/verify/integrity.rs
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::errors::{BackupError, Result};

const CHECKSUM_CHUNK_BYTES: usize = 64 * 1024;

fn not_readable(path: &Path, detail: impl ToString) -> BackupError {
    BackupError::NotReadable {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Existence, readability and minimum plausible size. Returns the size.
pub fn check_file_integrity(path: &Path, min_bytes: u64) -> Result<u64> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BackupError::NotFound { path: path.to_path_buf() });
        }
        Err(e) => return Err(not_readable(path, e)),
    };
    if !metadata.is_file() {
        return Err(not_readable(path, "not a regular file"));
    }

    let mut probe = [0u8; 1];
    File::open(path)
        .and_then(|mut f| f.read(&mut probe))
        .map_err(|e| not_readable(path, e))?;

    let size = metadata.len();
    if size < min_bytes {
        return Err(BackupError::TooSmall { size, min: min_bytes });
    }
    Ok(size)
}

/// SHA-256 of the whole file as lowercase hex, read in fixed-size chunks.
pub fn compute_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| not_readable(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHECKSUM_CHUNK_BYTES];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(not_readable(path, format!("read failed while hashing: {}", e))),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
