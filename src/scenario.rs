// src/scenario.rs

//! Scenario set
//!
//! Each scenario is one test case over the shared lifecycle
//! prepare -> drive -> verify. Variant-specific behavior is confined to
//! the preparation parameters and the flags handed to `convert`; the
//! resume loop and the final verification are shared by all of them.

use crate::container::OpenContainer;
use crate::engine::{ConvertOptions, ConvertOutcome, Engine};
use crate::error::{Error, Result};
use crate::hash;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default on-disk size of the container header (4096 sectors)
pub const DEFAULT_HEADER_BYTES: u64 = 4096 * 512;
/// Size of the region snapshotted into the header-backup file (128 MiB).
/// Shorter devices hash to EOF; the bound is an upper limit.
pub const BACKUP_REGION_BYTES: u64 = 128 * 1024 * 1024;
/// Flag that makes the binary under test inject synthetic I/O errors
const FAULT_INJECTION_FLAG: &str = "--development-ioerrors";
/// Payload alignment for the large-header scenario, in sectors
const REALIGN_PAYLOAD_SECTORS: u64 = 9999;
/// Format parameters for the non-default-cipher re-conversion scenario
const CUSTOM_FORMAT_PARAMS: [&str; 6] = ["-c", "twofish-lrw-benbi", "-s", "320", "-h", "sha256"];
/// Delay before the first injected abort
const FIRST_ABORT: Duration = Duration::from_secs(15);
/// Bounds for the randomized abort delay on resume legs, in seconds
const RESUME_ABORT_MIN_SECS: u64 = 20;
const RESUME_ABORT_MAX_SECS: u64 = 50;
/// Resume legs allowed before the scenario is declared stuck. Far above
/// anything a correct tool needs, but keeps a tool that always reports
/// "suspended" from looping forever.
const MAX_RESUME_ATTEMPTS: u32 = 64;

/// Where the known plaintext lived before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Unencrypted raw device
    Plain,
    /// Already-encrypted container (re-conversion)
    Encrypted,
}

/// Immutable ground truth snapshotted once per scenario, before the first
/// conversion leg. Everything verified afterwards is verified against it.
#[derive(Debug, Clone)]
pub struct PreTestParameters {
    pub seed: u32,
    pub plain_data_hash: String,
    pub backup_header_hash: String,
    pub source: DataSource,
    /// Bytes the container header consumes out of the raw device
    pub expected_size_diff: u64,
    pub device_size_before: u64,
    /// Expected size of the unlocked payload after conversion
    pub device_size_after: u64,
}

/// How a conversion gets interrupted mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interruption {
    /// Run to completion in one leg
    #[default]
    None,
    /// SIGHUP after a fixed delay on the first leg, then randomized delays
    /// on every resume leg
    TimedAbort,
    /// The binary's own synthetic I/O errors force suspensions
    FaultInjection,
}

/// One test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Plain device, single conversion leg, content check
    Simple,
    /// Conversion repeatedly interrupted by timed SIGHUP and resumed
    Aborted,
    /// Conversion repeatedly suspended by injected I/O faults and resumed
    FaultInjected,
    /// Conversion with an explicit payload alignment; the payload size
    /// delta must match the requested alignment exactly
    Realign { payload_sectors: u64 },
    /// Convert a device that already is an encrypted container, reading
    /// the plaintext through its unlocked mapping
    Reconvert {
        interruption: Interruption,
        format_params: Vec<String>,
    },
}

impl Scenario {
    /// All scenarios in the standard order.
    pub fn all() -> Vec<Scenario> {
        vec![
            Scenario::Simple,
            Scenario::Aborted,
            Scenario::FaultInjected,
            Scenario::Realign {
                payload_sectors: REALIGN_PAYLOAD_SECTORS,
            },
            Scenario::Reconvert {
                interruption: Interruption::None,
                format_params: Vec::new(),
            },
            Scenario::Reconvert {
                interruption: Interruption::TimedAbort,
                format_params: Vec::new(),
            },
            Scenario::Reconvert {
                interruption: Interruption::FaultInjection,
                format_params: Vec::new(),
            },
            Scenario::Reconvert {
                interruption: Interruption::None,
                format_params: CUSTOM_FORMAT_PARAMS.iter().map(|s| s.to_string()).collect(),
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Simple => "simple",
            Scenario::Aborted => "aborted",
            Scenario::FaultInjected => "fault-injected",
            Scenario::Realign { .. } => "realign",
            Scenario::Reconvert {
                interruption,
                format_params,
            } => match (interruption, format_params.is_empty()) {
                (Interruption::None, true) => "reconvert",
                (Interruption::TimedAbort, _) => "reconvert-aborted",
                (Interruption::FaultInjection, _) => "reconvert-fault-injected",
                (Interruption::None, false) => "reconvert-custom-format",
            },
        }
    }

    /// Run the scenario to a verdict. Any returned error is fatal to this
    /// scenario only; the engine stays usable for the next one.
    pub fn run(&self, engine: &mut Engine) -> Result<()> {
        engine.cleanup_files()?;
        match self {
            Scenario::Simple => {
                let params = prepare_plain(engine, DEFAULT_HEADER_BYTES)?;
                drive(engine, &params, Interruption::None, &[], None)?;
                verify_container(engine, &params)
            }
            Scenario::Aborted => {
                let params = prepare_plain(engine, DEFAULT_HEADER_BYTES)?;
                drive(engine, &params, Interruption::TimedAbort, &[], None)?;
                verify_container(engine, &params)
            }
            Scenario::FaultInjected => {
                let params = prepare_plain(engine, DEFAULT_HEADER_BYTES)?;
                drive(engine, &params, Interruption::FaultInjection, &[], None)?;
                verify_container(engine, &params)
            }
            Scenario::Realign { payload_sectors } => {
                let params = prepare_plain(engine, payload_sectors * 512)?;
                let align = format!("--luksparams=--align-payload={}", payload_sectors);
                drive(engine, &params, Interruption::None, &[align], None)?;
                verify_container(engine, &params)
            }
            Scenario::Reconvert {
                interruption,
                format_params,
            } => {
                let params = prepare_encrypted(engine, format_params)?;
                let container = engine.open_container()?;
                // Stale key/backup/resume files belong to the preparation
                // run; the conversion under test starts clean.
                let driven = engine
                    .cleanup_files()
                    .and_then(|_| drive(engine, &params, *interruption, &[], Some(&container)));
                let closed = engine.close_container(&container);
                driven?;
                closed?;
                verify_container(engine, &params)
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Scenario::Simple),
            "aborted" => Ok(Scenario::Aborted),
            "fault-injected" => Ok(Scenario::FaultInjected),
            "realign" => Ok(Scenario::Realign {
                payload_sectors: REALIGN_PAYLOAD_SECTORS,
            }),
            "reconvert" => Ok(Scenario::Reconvert {
                interruption: Interruption::None,
                format_params: Vec::new(),
            }),
            "reconvert-aborted" => Ok(Scenario::Reconvert {
                interruption: Interruption::TimedAbort,
                format_params: Vec::new(),
            }),
            "reconvert-fault-injected" => Ok(Scenario::Reconvert {
                interruption: Interruption::FaultInjection,
                format_params: Vec::new(),
            }),
            "reconvert-custom-format" => Ok(Scenario::Reconvert {
                interruption: Interruption::None,
                format_params: CUSTOM_FORMAT_PARAMS.iter().map(|s| s.to_string()).collect(),
            }),
            other => Err(format!("unknown scenario `{}`", other)),
        }
    }
}

/// Seed a plain device with a pseudorandom pattern and snapshot the ground
/// truth: the pattern digest (excluding the tail the header will consume)
/// and the digest of the region that will land in the header backup.
pub fn prepare_plain(engine: &mut Engine, expected_size_diff: u64) -> Result<PreTestParameters> {
    let device_size_before = engine.refresh_device_size()?;
    let seed = rand::random::<u32>();
    let plain_data_hash = engine.patternize_raw(expected_size_diff, seed)?;
    let backup_header_hash = engine.hash_raw_range(BACKUP_REGION_BYTES)?;
    Ok(PreTestParameters {
        seed,
        plain_data_hash,
        backup_header_hash,
        source: DataSource::Plain,
        expected_size_diff,
        device_size_before,
        device_size_after: device_size_before - expected_size_diff,
    })
}

/// Format the raw device as an encrypted container, seed its unlocked
/// payload with a pattern, and snapshot the ground truth. Re-conversion
/// keeps the payload size, so the expected size diff is zero.
pub fn prepare_encrypted(
    engine: &mut Engine,
    format_params: &[String],
) -> Result<PreTestParameters> {
    let seed = rand::random::<u32>();
    engine.format_container(format_params)?;
    let container = engine.open_container()?;
    let prepared = (|| -> Result<(u64, String)> {
        let payload_size = hash::device_size(&container.unlocked_device)?;
        let plain_data_hash = engine.patternize_device(&container.unlocked_device, 0, seed)?;
        Ok((payload_size, plain_data_hash))
    })();
    let closed = engine.close_container(&container);
    let (device_size_before, plain_data_hash) = prepared?;
    closed?;

    let backup_header_hash = engine.hash_raw_range(BACKUP_REGION_BYTES)?;
    Ok(PreTestParameters {
        seed,
        plain_data_hash,
        backup_header_hash,
        source: DataSource::Encrypted,
        expected_size_diff: 0,
        device_size_before,
        device_size_after: device_size_before,
    })
}

/// Shared resume-loop driver.
///
/// Invokes `convert`, verifies the header-backup digest after every leg
/// (suspended legs included; the backup region must never be observed in a
/// half-written state), and keeps resuming while the tool reports
/// Suspended.
fn drive(
    engine: &mut Engine,
    params: &PreTestParameters,
    interruption: Interruption,
    extra_args: &[String],
    container: Option<&OpenContainer>,
) -> Result<()> {
    let mut extra = extra_args.to_vec();
    if interruption == Interruption::FaultInjection {
        extra.push(FAULT_INJECTION_FLAG.to_string());
    }

    let mut options = ConvertOptions {
        resume: false,
        read_device: container.map(|c| c.unlocked_device.clone()),
        abort_after: (interruption == Interruption::TimedAbort).then_some(FIRST_ABORT),
        extra_args: extra,
        accept_suspended: interruption == Interruption::FaultInjection,
    };

    let mut outcome = engine.convert(&options)?;
    engine.verify_backup_file(&params.backup_header_hash)?;

    let mut attempts = 0;
    while outcome == ConvertOutcome::Suspended {
        attempts += 1;
        if attempts > MAX_RESUME_ATTEMPTS {
            return Err(Error::ResumeExhausted {
                attempts: MAX_RESUME_ATTEMPTS,
            });
        }
        options.resume = true;
        if interruption == Interruption::TimedAbort {
            options.abort_after = Some(random_resume_abort());
        }
        outcome = engine.convert(&options)?;
        engine.verify_backup_file(&params.backup_header_hash)?;
    }
    Ok(())
}

/// Verify the terminal state against the snapshot: header-backup digest,
/// unlocked payload size delta, unlocked payload content digest.
pub fn verify_container(engine: &mut Engine, params: &PreTestParameters) -> Result<()> {
    engine.verify_backup_file(&params.backup_header_hash)?;

    let container = engine.open_container()?;
    let result = (|| {
        let payload_size = hash::device_size(&container.unlocked_device)?;
        if payload_size != params.device_size_after {
            return Err(Error::VerificationFailure {
                source_name: container.unlocked_device.display().to_string(),
                expected: format!("{} bytes", params.device_size_after),
                actual: format!("{} bytes", payload_size),
            });
        }
        engine.verify_device(&container.unlocked_device, &params.plain_data_hash)
    })();
    let closed = engine.close_container(&container);
    result?;
    closed?;
    Ok(())
}

fn random_resume_abort() -> Duration {
    let secs = rand::thread_rng().gen_range(RESUME_ABORT_MIN_SECS..=RESUME_ABORT_MAX_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_scenario_names_round_trip() {
        for scenario in Scenario::all() {
            let parsed: Scenario = scenario.name().parse().unwrap();
            assert_eq!(parsed, scenario);
        }
    }

    #[test]
    fn test_scenario_names_are_unique() {
        let names: HashSet<_> = Scenario::all().iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), Scenario::all().len());
    }

    #[test]
    fn test_unknown_scenario_name_is_rejected() {
        assert!("no-such-scenario".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_realign_uses_exact_sector_delta() {
        let Scenario::Realign { payload_sectors } = "realign".parse::<Scenario>().unwrap() else {
            panic!("realign parsed to the wrong variant");
        };
        assert_eq!(payload_sectors, 9999);
        assert_eq!(payload_sectors * 512, 5_119_488);
    }

    #[test]
    fn test_resume_abort_delay_stays_in_range() {
        for _ in 0..100 {
            let delay = random_resume_abort();
            assert!(delay >= Duration::from_secs(RESUME_ABORT_MIN_SECS));
            assert!(delay <= Duration::from_secs(RESUME_ABORT_MAX_SECS));
        }
    }
}
