// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use convproof::{Engine, EngineConfig, Scenario};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "convproof")]
#[command(author, version, about = "Crash-safety test orchestrator for in-place encryption conversion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test scenarios against a disposable device
    Run {
        /// Raw block device to destroy; must be on the kill list
        #[arg(short, long)]
        device: PathBuf,
        /// Conversion binary under test
        #[arg(short, long)]
        binary: PathBuf,
        /// Scenario names (all scenarios if omitted)
        scenarios: Vec<String>,
        /// Volume tool used to format/open/close containers
        #[arg(long, default_value = "cryptsetup")]
        volume_tool: PathBuf,
        /// Deterministic pattern generator
        #[arg(long, default_value = "prng/prng_crc64")]
        pattern_generator: PathBuf,
        /// Directory for invocation logs
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
        /// Directory for the header-backup, resume and key files
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Kill-list file naming the devices this harness may destroy
        #[arg(long, default_value = "kill_list.txt")]
        kill_list: PathBuf,
        /// Rebuild the loop device's backing file at this byte size before
        /// every scenario (loop devices only)
        #[arg(long)]
        loop_size: Option<u64>,
        /// Number of times to run each selected scenario
        #[arg(long, default_value_t = 1)]
        iterations: u32,
        /// Extra argument appended to every conversion command line
        /// (repeatable)
        #[arg(long = "passthrough", value_name = "ARG")]
        passthrough: Vec<String>,
    },
    /// List available scenario names
    List,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            for scenario in Scenario::all() {
                println!("{}", scenario);
            }
            Ok(())
        }
        Commands::Run {
            device,
            binary,
            scenarios,
            volume_tool,
            pattern_generator,
            log_dir,
            data_dir,
            kill_list,
            loop_size,
            iterations,
            passthrough,
        } => {
            let scenarios = if scenarios.is_empty() {
                Scenario::all()
            } else {
                scenarios
                    .iter()
                    .map(|name| name.parse::<Scenario>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| anyhow::anyhow!(e))?
            };

            let mut engine = Engine::new(EngineConfig {
                device,
                convert_binary: binary,
                volume_binary: volume_tool,
                pattern_binary: pattern_generator,
                log_dir,
                data_dir,
                kill_list,
                passthrough,
                mapper_dir: None,
            })?;

            let mut failures = 0u32;
            for iteration in 1..=iterations {
                if iterations > 1 {
                    engine.note(&format!("iteration {}/{}", iteration, iterations))?;
                }
                for scenario in &scenarios {
                    if let Some(size) = loop_size {
                        engine.reset_loop_device(size)?;
                    }
                    engine.cleanup_files()?;
                    engine.scrub_header()?;
                    engine.new_testcase(scenario.name())?;
                    match scenario.run(&mut engine) {
                        Ok(()) => engine.finished_testcase(scenario.name(), "PASS")?,
                        Err(e) => {
                            failures += 1;
                            error!("scenario {} failed: {}", scenario, e);
                            engine.finished_testcase(scenario.name(), "FAIL")?;
                        }
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} scenario run(s) failed", failures);
            }
            Ok(())
        }
    }
}
