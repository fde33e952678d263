// src/process.rs

//! External process execution and invocation logging
//!
//! Every external command goes through [`Runner`]: each invocation gets a
//! numbered log file capturing the command line, the raw process output
//! and the final exit code, plus a timestamped line in the append-only
//! summary log. An invocation may carry an abort delay, after which the
//! child is sent SIGHUP to simulate an externally forced interruption.
//! The delay is realized at the wait boundary (`wait_timeout`), so a child
//! that exits inside the window is never signalled and a reused PID can
//! never be hit.

use crate::error::{Error, Result};
use chrono::Local;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::info;

use wait_timeout::ChildExt;

/// One external process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    success_codes: Vec<i32>,
    abort_after: Option<Duration>,
}

impl Invocation {
    /// A new invocation accepting only exit code 0.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            success_codes: vec![0],
            abort_after: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the set of exit codes treated as success.
    pub fn success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    /// Send SIGHUP to the child if it is still running after `delay`.
    pub fn abort_after(mut self, delay: Duration) -> Self {
        self.abort_after = Some(delay);
        self
    }

    /// Rendered command line, used in log headers and error messages.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Numbered per-invocation log files plus the append-only summary log.
#[derive(Debug)]
pub struct InvocationLog {
    dir: PathBuf,
    summary: File,
    last_index: u32,
}

impl InvocationLog {
    /// Open the log directory, creating it if needed. The invocation index
    /// continues from the highest `NNNN.log` already present, so a
    /// restarted orchestrator never reuses a log file name.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let summary = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("summary.txt"))?;
        let last_index = last_log_index(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            summary,
            last_index,
        })
    }

    /// Append a timestamped line to the summary log.
    pub fn note(&mut self, message: &str) -> Result<()> {
        info!("{}", message);
        writeln!(
            self.summary,
            "{}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )?;
        self.summary.flush()?;
        Ok(())
    }

    /// Allocate the next numbered log file with its header written.
    fn create_log_file(&mut self, purpose: &str) -> Result<(File, PathBuf)> {
        self.last_index += 1;
        let path = self.dir.join(format!("{:04}.log", self.last_index));
        let mut file = File::create(&path)?;
        writeln!(file, "{}", purpose)?;
        writeln!(file, "{}", "=".repeat(120))?;
        file.flush()?;
        Ok((file, path))
    }
}

fn last_log_index(dir: &Path) -> Result<u32> {
    let mut last = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".log")
            && let Ok(index) = stem.parse::<u32>()
        {
            last = last.max(index);
        }
    }
    Ok(last)
}

/// Executes external commands one at a time, logging each invocation.
#[derive(Debug)]
pub struct Runner {
    log: InvocationLog,
}

impl Runner {
    pub fn new(log: InvocationLog) -> Self {
        Self { log }
    }

    pub fn log_mut(&mut self) -> &mut InvocationLog {
        &mut self.log
    }

    /// Run one invocation to completion and classify its exit code.
    ///
    /// Returns the exit code when it is a member of the invocation's
    /// accepted set; any other code is an [`Error::ProcessFailure`]. The
    /// caller interprets accepted codes (e.g. the "suspended" sentinel);
    /// this layer only decides pass/fail.
    pub fn execute(&mut self, invocation: &Invocation) -> Result<i32> {
        let command_line = invocation.command_line();
        let (mut log_file, log_path) = self.log.create_log_file(&command_line)?;
        self.log
            .note(&format!("Execute: {} -> {}", command_line, log_path.display()))?;

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?))
            .spawn()?;

        let status = match invocation.abort_after {
            Some(delay) => match child.wait_timeout(delay)? {
                // Exited inside the abort window; nothing to signal.
                Some(status) => status,
                None => {
                    self.log.note(&format!(
                        "aborting `{}` after {:?}: sending SIGHUP to pid {}",
                        command_line,
                        delay,
                        child.id()
                    ))?;
                    kill(Pid::from_raw(child.id() as i32), Signal::SIGHUP)
                        .map_err(std::io::Error::other)?;
                    child.wait()?
                }
            },
            None => child.wait()?,
        };

        let code = status.code().unwrap_or(-1);
        writeln!(log_file, "{}", "=".repeat(120))?;
        writeln!(log_file, "Process returned with returncode {}", code)?;
        log_file.flush()?;

        if !invocation.success_codes.contains(&code) {
            let mut accepted = invocation.success_codes.clone();
            accepted.sort_unstable();
            let failure = Error::ProcessFailure {
                command: command_line,
                code,
                accepted,
            };
            self.log.note(&failure.to_string())?;
            return Err(failure);
        }
        Ok(code)
    }
}
