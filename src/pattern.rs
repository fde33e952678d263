// src/pattern.rs

//! Single-pass pattern seeding
//!
//! Known plaintext is produced by an external deterministic generator
//! parameterized by a byte count and a seed. Its output is written to the
//! target device and folded into a streaming digest in the same pass, so
//! the digest of a freshly seeded device is known without a second
//! full-device read.

use crate::error::{Error, Result};
use crate::hash::CHUNK_SIZE;
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Drives the external pseudorandom pattern generator.
#[derive(Debug, Clone)]
pub struct Patternizer {
    binary: PathBuf,
}

impl Patternizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Fill `target` with `length` pseudorandom bytes derived from `seed`,
    /// starting at offset 0, and return the SHA-256 digest of exactly what
    /// was written.
    pub fn patternize(&self, target: &Path, length: u64, seed: u32) -> Result<String> {
        assert!(length > 0, "patternize needs a nonzero length");
        info!(
            "patternizing {} with seed {} for {} bytes ({:.1} MiB)",
            target.display(),
            seed,
            length,
            length as f64 / 1024.0 / 1024.0
        );

        let mut child = Command::new(&self.binary)
            .arg(length.to_string())
            .arg(seed.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::PatternGenerator(format!(
                    "failed to spawn {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;
        let mut generated = child
            .stdout
            .take()
            .ok_or_else(|| Error::PatternGenerator("generator stdout unavailable".to_string()))?;

        let mut device = OpenOptions::new().write(true).create(true).open(target)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        // Tee: every chunk goes to the device and into the digest. An empty
        // read is the generator signalling end-of-stream.
        loop {
            let n = generated.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            device.write_all(&buffer[..n])?;
        }
        device.flush()?;

        let status = child.wait()?;
        if !status.success() {
            return Err(Error::PatternGenerator(format!(
                "{} exited with code {}",
                self.binary.display(),
                status.code().unwrap_or(-1)
            )));
        }

        let digest = format!("{:x}", hasher.finalize());
        debug!("patternized {}: {}", target.display(), digest);
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Fake generator: emits exactly $1 bytes derived from seed $2.
    fn fake_generator(dir: &Path) -> PathBuf {
        let path = dir.join("fake_prng");
        fs::write(&path, "#!/bin/sh\nyes \"pattern-$2\" | head -c \"$1\"\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn test_patternize_digest_matches_rehash() {
        let dir = tempfile::tempdir().unwrap();
        let generator = fake_generator(dir.path());
        let target = dir.path().join("device.img");

        let patternizer = Patternizer::new(&generator);
        let length = 2 * CHUNK_SIZE as u64 + 777;
        let written = patternizer.patternize(&target, length, 42).unwrap();

        assert_eq!(hash::device_size(&target).unwrap(), length);
        let reread = hash::hash_range(&target, length).unwrap();
        assert_eq!(written, reread);
    }

    #[test]
    fn test_patternize_is_seed_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let generator = fake_generator(dir.path());
        let patternizer = Patternizer::new(&generator);

        let a = patternizer
            .patternize(&dir.path().join("a.img"), 4096, 1)
            .unwrap();
        let b = patternizer
            .patternize(&dir.path().join("b.img"), 4096, 2)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_patternize_missing_generator() {
        let dir = tempfile::tempdir().unwrap();
        let patternizer = Patternizer::new(dir.path().join("does-not-exist"));
        let err = patternizer
            .patternize(&dir.path().join("device.img"), 4096, 0)
            .unwrap_err();
        assert!(matches!(err, Error::PatternGenerator(_)));
    }
}
