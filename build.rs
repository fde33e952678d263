// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("convproof")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Crash-safety test orchestrator for in-place encryption conversion")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run test scenarios against a disposable device")
                .arg(
                    Arg::new("device")
                        .short('d')
                        .long("device")
                        .required(true)
                        .help("Raw block device to destroy; must be on the kill list"),
                )
                .arg(
                    Arg::new("binary")
                        .short('b')
                        .long("binary")
                        .required(true)
                        .help("Conversion binary under test"),
                )
                .arg(Arg::new("scenarios").num_args(0..).help("Scenario names (all if omitted)"))
                .arg(
                    Arg::new("volume_tool")
                        .long("volume-tool")
                        .default_value("cryptsetup")
                        .help("Volume tool used to format/open/close containers"),
                )
                .arg(
                    Arg::new("pattern_generator")
                        .long("pattern-generator")
                        .default_value("prng/prng_crc64")
                        .help("Deterministic pattern generator"),
                )
                .arg(
                    Arg::new("log_dir")
                        .long("log-dir")
                        .default_value("logs")
                        .help("Directory for invocation logs"),
                )
                .arg(
                    Arg::new("data_dir")
                        .long("data-dir")
                        .default_value("data")
                        .help("Directory for the header-backup, resume and key files"),
                )
                .arg(
                    Arg::new("kill_list")
                        .long("kill-list")
                        .default_value("kill_list.txt")
                        .help("Kill-list file naming the devices this harness may destroy"),
                )
                .arg(
                    Arg::new("loop_size")
                        .long("loop-size")
                        .help("Rebuild the loop device's backing file at this byte size before every scenario"),
                )
                .arg(
                    Arg::new("iterations")
                        .long("iterations")
                        .default_value("1")
                        .help("Number of times to run each selected scenario"),
                )
                .arg(
                    Arg::new("passthrough")
                        .long("passthrough")
                        .action(ArgAction::Append)
                        .help("Extra argument appended to every conversion command line"),
                ),
        )
        .subcommand(Command::new("list").about("List available scenario names"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("convproof.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
