// src/container.rs

//! Encrypted-container lifecycle
//!
//! Thin wrappers around the external volume tool: format the container on
//! the raw device, unlock it under a random mapping name, tear the mapping
//! down. These operations never hash or inspect content; the tool is an
//! opaque capability and every call goes through the [`Runner`] so it ends
//! up in the invocation log like everything else.

use crate::error::{Error, Result};
use crate::process::{Invocation, Runner};
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Key length persisted to the key file on format
const KEY_LENGTH: usize = 32;
/// Length of the random device-mapper name used per open
const MAPPING_NAME_LENGTH: usize = 8;

/// Handle to an unlocked container.
///
/// Exclusively owned by the caller from open to close. The mapping name is
/// freshly random per open so leftover or concurrent mappings cannot
/// collide. Closing is not idempotent: close a handle exactly once.
#[derive(Debug, Clone)]
pub struct OpenContainer {
    pub raw_device: PathBuf,
    pub unlocked_device: PathBuf,
    pub key_file: PathBuf,
    pub mapping_name: String,
}

/// Lifecycle wrapper around the external volume tool.
#[derive(Debug, Clone)]
pub struct VolumeManager {
    binary: PathBuf,
    device: PathBuf,
    key_file: PathBuf,
    mapper_dir: PathBuf,
}

impl VolumeManager {
    pub fn new(
        binary: impl Into<PathBuf>,
        device: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            device: device.into(),
            key_file: key_file.into(),
            mapper_dir: PathBuf::from("/dev/mapper"),
        }
    }

    /// Override the directory where unlocked mappings appear. Integration
    /// tests point this at a scratch directory served by a fake volume
    /// tool.
    pub fn with_mapper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mapper_dir = dir.into();
        self
    }

    /// Initialize the container on the raw device with a fresh random key,
    /// persisting the key to the key file first.
    pub fn format(&self, runner: &mut Runner, params: &[String]) -> Result<()> {
        fs::write(&self.key_file, random_lowercase(KEY_LENGTH))?;
        let invocation = Invocation::new(&self.binary)
            .arg("luksFormat")
            .arg("-q")
            .arg("--key-file")
            .arg(self.key_file.display().to_string())
            .args(params.iter().cloned())
            .arg(self.device.display().to_string());
        runner.execute(&invocation)?;
        Ok(())
    }

    /// Unlock the raw device under a freshly random mapping name.
    pub fn open(&self, runner: &mut Runner) -> Result<OpenContainer> {
        let mapping_name = random_lowercase(MAPPING_NAME_LENGTH);
        let invocation = Invocation::new(&self.binary)
            .arg("luksOpen")
            .arg(self.device.display().to_string())
            .arg(&mapping_name)
            .arg("-d")
            .arg(self.key_file.display().to_string());
        runner
            .execute(&invocation)
            .map_err(|e| Error::ContainerOpen(e.to_string()))?;

        let unlocked_device = self.mapper_dir.join(&mapping_name);
        debug!(
            "container open: {} -> {}",
            self.device.display(),
            unlocked_device.display()
        );
        Ok(OpenContainer {
            raw_device: self.device.clone(),
            unlocked_device,
            key_file: self.key_file.clone(),
            mapping_name,
        })
    }

    /// Tear down a mapping.
    pub fn close(&self, runner: &mut Runner, container: &OpenContainer) -> Result<()> {
        let invocation = Invocation::new(&self.binary)
            .arg("luksClose")
            .arg(&container.mapping_name);
        runner
            .execute(&invocation)
            .map_err(|e| Error::ContainerClose(e.to_string()))?;
        Ok(())
    }
}

/// Random ASCII-lowercase string, used for key material and mapping names.
fn random_lowercase(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}
