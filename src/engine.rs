// src/engine.rs

//! Orchestration engine
//!
//! [`Engine`] owns every piece of run-wide state: the kill-list gate, the
//! invocation log, the cached raw-device size and the fixed on-disk data
//! paths (header backup, resume file, key file). Scenarios drive it; it
//! runs exactly one external process at a time and blocks on it.
//!
//! The central operation is [`Engine::convert`], which reproduces the
//! conversion binary's command-line contract and maps its exit codes onto
//! the resume state machine:
//!
//! ```text
//! Running -> { Completed, Suspended, Failed }
//! Suspended -> Running (resume = true)
//! ```
//!
//! `Failed` is not a variant here: any exit code outside the accepted set
//! surfaces as a [`crate::Error::ProcessFailure`] and aborts the scenario.

use crate::container::{OpenContainer, VolumeManager};
use crate::error::{Error, Result};
use crate::hash;
use crate::killlist::KillList;
use crate::pattern::Patternizer;
use crate::process::{Invocation, InvocationLog, Runner};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log level passed to the conversion binary (0..4, 4 = debug)
const CONVERT_LOG_LEVEL: &str = "4";

/// Exit code the conversion binary uses for "suspended, safe to resume"
pub const SUSPENDED_EXIT_CODE: i32 = 2;

/// Outcome of one `convert` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// Exit code 0: the device is fully converted
    Completed,
    /// Exit code 2: stopped safely midway, resume file written
    Suspended,
}

/// Options for one `convert` invocation.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Continue a previously interrupted conversion
    pub resume: bool,
    /// Read plaintext through an already-unlocked mapping instead of the
    /// raw device (re-conversion)
    pub read_device: Option<PathBuf>,
    /// Send SIGHUP to the binary after this delay
    pub abort_after: Option<Duration>,
    /// Flags appended after the engine-wide passthrough parameters
    pub extra_args: Vec<String>,
    /// Accept the suspended exit code even without a timed abort (fault
    /// injection suspends on its own schedule)
    pub accept_suspended: bool,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Raw block device that will be destroyed; must be on the kill list
    pub device: PathBuf,
    /// The conversion binary under test
    pub convert_binary: PathBuf,
    /// External volume tool (format/open/close)
    pub volume_binary: PathBuf,
    /// External deterministic pattern generator
    pub pattern_binary: PathBuf,
    /// Directory for numbered invocation logs and the summary log
    pub log_dir: PathBuf,
    /// Directory for the header-backup, resume and key files
    pub data_dir: PathBuf,
    /// Kill-list file
    pub kill_list: PathBuf,
    /// Parameters appended to every conversion command line
    pub passthrough: Vec<String>,
    /// Device-mapper directory override (`None` = `/dev/mapper`)
    pub mapper_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct Engine {
    device: PathBuf,
    convert_binary: PathBuf,
    passthrough: Vec<String>,
    backup_file: PathBuf,
    resume_file: PathBuf,
    key_file: PathBuf,
    loop_backing_file: PathBuf,
    runner: Runner,
    volumes: VolumeManager,
    patternizer: Patternizer,
    raw_device_size: u64,
}

impl Engine {
    /// Construct the engine.
    ///
    /// The kill-list gate runs before anything else: when the target
    /// device is not whitelisted, construction fails with
    /// [`Error::SafetyViolation`] and no component ever touches the
    /// device.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let kill_list = KillList::load(&config.kill_list)?;
        if !kill_list.contains(&config.device) {
            return Err(Error::SafetyViolation(config.device));
        }

        fs::create_dir_all(&config.data_dir)?;
        let log = InvocationLog::open(&config.log_dir)?;
        let mut runner = Runner::new(log);

        let backup_file = config.data_dir.join("backup.img");
        let resume_file = config.data_dir.join("resume.bin");
        let key_file = config.data_dir.join("keyfile.bin");
        let loop_backing_file = config.data_dir.join("loopback.img");

        let mut volumes = VolumeManager::new(&config.volume_binary, &config.device, &key_file);
        if let Some(dir) = &config.mapper_dir {
            volumes = volumes.with_mapper_dir(dir);
        }

        let raw_device_size = hash::device_size(&config.device)?;
        runner.log_mut().note(&format!(
            "engine ready: device {} ({} bytes)",
            config.device.display(),
            raw_device_size
        ))?;

        Ok(Self {
            device: config.device,
            convert_binary: config.convert_binary,
            passthrough: config.passthrough,
            backup_file,
            resume_file,
            key_file,
            loop_backing_file,
            runner,
            volumes,
            patternizer: Patternizer::new(&config.pattern_binary),
            raw_device_size,
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn backup_file(&self) -> &Path {
        &self.backup_file
    }

    /// Raw device size as cached at construction or the last refresh.
    pub fn raw_device_size(&self) -> u64 {
        self.raw_device_size
    }

    /// Re-query the raw device size (needed after external resizes, e.g. a
    /// rebuilt loop device).
    pub fn refresh_device_size(&mut self) -> Result<u64> {
        self.raw_device_size = hash::device_size(&self.device)?;
        Ok(self.raw_device_size)
    }

    /// Timestamped line in the run summary.
    pub fn note(&mut self, message: &str) -> Result<()> {
        self.runner.log_mut().note(message)
    }

    pub fn new_testcase(&mut self, name: &str) -> Result<()> {
        self.note(&format!("{} {} {}", "=".repeat(60), name, "=".repeat(60)))
    }

    pub fn finished_testcase(&mut self, name: &str, verdict: &str) -> Result<()> {
        self.note(&format!(
            "{} {} {} {}",
            "=".repeat(60),
            name,
            verdict,
            "=".repeat(60)
        ))
    }

    /// Hash the first `length` bytes of the raw device.
    pub fn hash_raw_range(&mut self, length: u64) -> Result<String> {
        let digest = hash::hash_range(&self.device, length)?;
        self.note(&format!(
            "hash {} (length {}): {}",
            self.device.display(),
            length,
            digest
        ))?;
        Ok(digest)
    }

    /// Verify the full content of a device against an expected digest.
    pub fn verify_device(&mut self, device: &Path, expected: &str) -> Result<()> {
        self.note(&format!("verifying digest of {}", device.display()))?;
        let result = hash::verify_file(device, expected);
        self.report_verification(&device.display().to_string(), expected, result)
    }

    /// Verify the header-backup file against the pre-recorded digest. This
    /// must hold after *every* conversion leg, including suspended ones.
    pub fn verify_backup_file(&mut self, expected: &str) -> Result<()> {
        self.note(&format!(
            "verifying digest of backup file {}",
            self.backup_file.display()
        ))?;
        let result = hash::verify_file(&self.backup_file, expected);
        let source = self.backup_file.display().to_string();
        self.report_verification(&source, expected, result)
    }

    fn report_verification(
        &mut self,
        source: &str,
        expected: &str,
        result: Result<()>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                self.note(&format!("PASS: {} has the expected digest ({})", source, expected))?;
                Ok(())
            }
            Err(e) => {
                self.note(&format!("FAIL: {}", e))?;
                Err(e)
            }
        }
    }

    /// Fill a device with a seeded pattern, excluding `exclude_bytes` at
    /// the end, and return the digest of what was written.
    pub fn patternize_device(
        &mut self,
        device: &Path,
        exclude_bytes: u64,
        seed: u32,
    ) -> Result<String> {
        let size = hash::device_size(device)?;
        assert!(
            exclude_bytes < size,
            "pattern on {} would be empty ({} bytes, {} excluded)",
            device.display(),
            size,
            exclude_bytes
        );
        let digest = self
            .patternizer
            .patternize(device, size - exclude_bytes, seed)?;
        self.note(&format!(
            "patternized {} (excluded {}): {}",
            device.display(),
            exclude_bytes,
            digest
        ))?;
        Ok(digest)
    }

    /// Patternize the raw device.
    pub fn patternize_raw(&mut self, exclude_bytes: u64, seed: u32) -> Result<String> {
        let device = self.device.clone();
        self.patternize_device(&device, exclude_bytes, seed)
    }

    /// Zero the first 32 MiB of the raw device so stale container headers
    /// never leak into the next test case.
    pub fn scrub_header(&mut self) -> Result<()> {
        self.note("scrubbing raw device header")?;
        let invocation = Invocation::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", self.device.display()))
            .arg("bs=1M")
            .arg("count=32");
        self.runner.execute(&invocation)?;
        Ok(())
    }

    /// Remove the header-backup, key and resume files. Files that do not
    /// exist are fine; anything else is an error.
    pub fn cleanup_files(&mut self) -> Result<()> {
        self.note("cleaning up data files")?;
        for path in [
            self.backup_file.clone(),
            self.key_file.clone(),
            self.resume_file.clone(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Rebuild the loop device's backing file at exactly `size` bytes and
    /// re-attach it. Only valid when the target is a loop device.
    pub fn reset_loop_device(&mut self, size: u64) -> Result<()> {
        assert!(
            self.device.to_string_lossy().starts_with("/dev/loop"),
            "{} is not a loop device",
            self.device.display()
        );
        self.note(&format!(
            "resetting loop device {} to {} bytes ({:.1} MiB)",
            self.device.display(),
            size,
            size as f64 / 1024.0 / 1024.0
        ))?;

        // Detach; exit code 1 means it simply was not attached.
        let detach = Invocation::new("losetup")
            .arg("-d")
            .arg(self.device.display().to_string())
            .success_codes(&[0, 1]);
        self.runner.execute(&detach)?;

        let megs = size.div_ceil(1024 * 1024);
        let fill = Invocation::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", self.loop_backing_file.display()))
            .arg("bs=1M")
            .arg(format!("count={}", megs));
        self.runner.execute(&fill)?;

        // Trim the backing file to the exact byte size.
        let backing = fs::OpenOptions::new()
            .write(true)
            .open(&self.loop_backing_file)?;
        backing.set_len(size)?;

        let attach = Invocation::new("losetup")
            .arg(self.device.display().to_string())
            .arg(self.loop_backing_file.display().to_string());
        self.runner.execute(&attach)?;

        self.refresh_device_size()?;
        Ok(())
    }

    /// Format the encrypted container on the raw device with a fresh key.
    pub fn format_container(&mut self, params: &[String]) -> Result<()> {
        self.volumes.format(&mut self.runner, params)
    }

    /// Unlock the container. The caller owns the handle and must close it
    /// exactly once.
    pub fn open_container(&mut self) -> Result<OpenContainer> {
        self.volumes.open(&mut self.runner)
    }

    pub fn close_container(&mut self, container: &OpenContainer) -> Result<()> {
        self.volumes.close(&mut self.runner, container)
    }

    /// Run one conversion invocation and map its exit code onto the
    /// resume state machine.
    pub fn convert(&mut self, options: &ConvertOptions) -> Result<ConvertOutcome> {
        let invocation = self.convert_invocation(options);
        let code = self.runner.execute(&invocation)?;
        if code == SUSPENDED_EXIT_CODE {
            Ok(ConvertOutcome::Suspended)
        } else {
            Ok(ConvertOutcome::Completed)
        }
    }

    fn convert_invocation(&self, options: &ConvertOptions) -> Invocation {
        let mut invocation = Invocation::new(&self.convert_binary)
            .arg("-d")
            .arg(self.device.display().to_string())
            .arg("-l")
            .arg(CONVERT_LOG_LEVEL)
            .arg("--i-know-what-im-doing")
            .arg("--keyfile")
            .arg(self.key_file.display().to_string())
            .arg("--backupfile")
            .arg(self.backup_file.display().to_string())
            .arg("--resume-file")
            .arg(self.resume_file.display().to_string());
        if options.resume {
            invocation = invocation.arg("--resume");
        }
        if let Some(read_device) = &options.read_device {
            invocation = invocation
                .arg("--readdev")
                .arg(read_device.display().to_string());
        }
        invocation = invocation
            .args(self.passthrough.iter().cloned())
            .args(options.extra_args.iter().cloned());
        if options.abort_after.is_some() || options.accept_suspended {
            invocation = invocation.success_codes(&[0, SUSPENDED_EXIT_CODE]);
        }
        if let Some(delay) = options.abort_after {
            invocation = invocation.abort_after(delay);
        }
        invocation
    }
}
