// src/lib.rs

//! convproof
//!
//! Integration-test orchestrator for an in-place block-device encryption
//! converter. It proves three things about the tool under test:
//!
//! - converted plaintext survives bit-for-bit,
//! - the header region relocated to a backup file is intact after every
//!   intermediate state,
//! - a conversion killed at an arbitrary point resumes to a correct
//!   terminal state, including under injected I/O errors.
//!
//! # Architecture
//!
//! - One [`engine::Engine`] per run: kill-list gate, invocation log,
//!   device-size cache, fixed data-file paths
//! - External tools (converter, volume tool, pattern generator) are
//!   opaque child processes, exactly one at a time
//! - [`scenario::Scenario`] variants share a single
//!   prepare -> resume-loop -> verify driver

pub mod container;
pub mod engine;
mod error;
pub mod hash;
pub mod killlist;
pub mod pattern;
pub mod process;
pub mod scenario;

pub use container::{OpenContainer, VolumeManager};
pub use engine::{ConvertOptions, ConvertOutcome, Engine, EngineConfig, SUSPENDED_EXIT_CODE};
pub use error::{Error, Result};
pub use killlist::KillList;
pub use pattern::Patternizer;
pub use process::{Invocation, InvocationLog, Runner};
pub use scenario::{DataSource, Interruption, PreTestParameters, Scenario};
