// src/hash.rs

//! Streaming content hashing for devices and files
//!
//! Everything the harness verifies is expressed as a SHA-256 hex digest:
//! the pattern written to a device before conversion, the unlocked payload
//! after conversion, and the relocated header backup in between. Devices
//! can be gigabytes in size, so hashing is always streamed in fixed 1 MiB
//! chunks and never buffers a full source.
//!
//! Length arguments are hard upper bounds, not guarantees: a source whose
//! accessible data ends early (e.g. a backup file shorter than the nominal
//! backup region) terminates the stream at EOF instead of erroring.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Chunk size for all streaming reads (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Byte size of a file or block device, queried by seeking to its end.
pub fn device_size(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    Ok(file.seek(SeekFrom::End(0))?)
}

/// Hash at most `length` bytes from the start of `path`.
pub fn hash_range(path: &Path, length: u64) -> Result<String> {
    let file = File::open(path)?;
    let digest = hash_limited(file, length)?;
    debug!("hashed {} (length {}): {}", path.display(), length, digest);
    Ok(digest)
}

/// Hash `path` from the start to end-of-file minus `exclude_bytes`.
pub fn hash_to_end(path: &Path, exclude_bytes: u64) -> Result<String> {
    let size = device_size(path)?;
    assert!(
        exclude_bytes <= size,
        "cannot exclude {} bytes from a {} byte source",
        exclude_bytes,
        size
    );
    hash_range(path, size - exclude_bytes)
}

/// Hash the entire content of a file or device.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let digest = hash_limited(file, u64::MAX)?;
    debug!("hashed {} (full): {}", path.display(), digest);
    Ok(digest)
}

/// Recompute the digest of at most `length` bytes of `path` and compare.
pub fn verify_range(path: &Path, expected: &str, length: u64) -> Result<()> {
    let actual = hash_range(path, length)?;
    check(path, expected, actual)
}

/// Recompute the whole-file digest of `path` and compare.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let actual = hash_file(path)?;
    check(path, expected, actual)
}

fn check(path: &Path, expected: &str, actual: String) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::VerificationFailure {
            source_name: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

fn hash_limited<R: Read>(mut reader: R, limit: u64) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut remaining = limit;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buffer[..want])?;
        if n == 0 {
            // Source exhausted before the bound; the data that exists is
            // the data that gets hashed.
            break;
        }
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }

    Ok(format!("{:x}", hasher.finalize()))
}
