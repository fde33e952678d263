// src/killlist.rs

//! Destruction whitelist
//!
//! The harness irrevocably overwrites its target device, so the device
//! must be explicitly whitelisted in the kill-list file before anything
//! destructive runs. There is no configuration override: permitting a new
//! device means editing the file.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Set of device paths the harness is permitted to destroy. Loaded once at
/// engine construction, immutable for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct KillList {
    devices: HashSet<PathBuf>,
}

impl KillList {
    /// Load the kill list. Lines starting with `#` or `;` are comments and
    /// blank lines are skipped. A missing file yields an empty list (with
    /// a warning), which the engine's constructor gate then rejects for
    /// every device.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("no kill list found at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };
        Ok(Self::parse(&content))
    }

    fn parse(content: &str) -> Self {
        let mut devices = HashSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            devices.insert(PathBuf::from(line));
        }
        Self { devices }
    }

    pub fn contains(&self, device: &Path) -> bool {
        self.devices.contains(device)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
