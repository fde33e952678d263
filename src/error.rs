// src/error.rs

//! Error types for the conversion harness

use std::path::PathBuf;
use thiserror::Error;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while orchestrating a conversion test.
///
/// Every variant is fatal to the scenario that raised it. The designed
/// "suspended" outcome of the conversion binary is *not* an error; it is
/// represented by [`crate::engine::ConvertOutcome::Suspended`].
#[derive(Error, Debug)]
pub enum Error {
    /// The target device is not whitelisted for destruction
    #[error(
        "device {} is not on the kill list, refusing to work with it. \
         Add it to the kill list file if you accept the irrevocable \
         destruction of all data on it",
        .0.display()
    )]
    SafetyViolation(PathBuf),

    /// An external process exited with a code outside its accepted set
    #[error("execution of `{command}` failed with exit code {code} (accepted: {accepted:?})")]
    ProcessFailure {
        command: String,
        code: i32,
        accepted: Vec<i32>,
    },

    /// Content digest mismatch on a device or file
    #[error("{source_name} should have digest {expected} but has digest {actual}")]
    VerificationFailure {
        source_name: String,
        expected: String,
        actual: String,
    },

    /// The volume tool failed to unlock the container
    #[error("failed to open encrypted container: {0}")]
    ContainerOpen(String),

    /// The volume tool failed to tear down the mapping
    #[error("failed to close encrypted container: {0}")]
    ContainerClose(String),

    /// The pattern generator could not be driven to completion
    #[error("pattern generator failed: {0}")]
    PatternGenerator(String),

    /// The conversion still reported "suspended" after the retry budget
    #[error("conversion still suspended after {attempts} resume attempts")]
    ResumeExhausted { attempts: u32 },

    /// IO error during file or device operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
