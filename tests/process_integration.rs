// tests/process_integration.rs

//! Process-control and pipeline behavior that the scenario tests only
//! exercise indirectly: the timed SIGHUP abort, the single-pass
//! patternize-then-hash identity, and the on-disk log layout.

mod common;

use common::Sandbox;
use convproof::hash;
use convproof::{ConvertOptions, ConvertOutcome, Invocation, InvocationLog, Runner};
use std::fs;
use std::time::{Duration, Instant};

#[test]
fn test_timed_abort_interrupts_a_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("sleeper");
    common::write_script(
        &script,
        "#!/bin/sh\ntrap 'exit 2' HUP\nsleep 30 &\nwait $!\nexit 0\n",
    );

    let log = InvocationLog::open(&dir.path().join("logs")).unwrap();
    let mut runner = Runner::new(log);

    let started = Instant::now();
    let invocation = Invocation::new(&script)
        .success_codes(&[0, 2])
        .abort_after(Duration::from_millis(300));
    let code = runner.execute(&invocation).unwrap();

    assert_eq!(code, 2, "the child should exit via its HUP handler");
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the abort must interrupt the 30s sleep"
    );
}

#[test]
fn test_timed_abort_spares_a_child_that_exits_first() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("quick");
    common::write_script(&script, "#!/bin/sh\nexit 0\n");

    let log = InvocationLog::open(&dir.path().join("logs")).unwrap();
    let mut runner = Runner::new(log);

    let started = Instant::now();
    let invocation = Invocation::new(&script)
        .success_codes(&[0, 2])
        .abort_after(Duration::from_secs(30));
    let code = runner.execute(&invocation).unwrap();

    assert_eq!(code, 0);
    // The abort window must not be waited out once the child is gone.
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_patternize_then_rehash_is_identical() {
    let sandbox = Sandbox::new();
    let mut engine = sandbox.engine();

    let written = engine.patternize_raw(0, 1234).unwrap();
    let reread = hash::hash_file(&sandbox.device).unwrap();
    assert_eq!(written, reread);

    // A different seed writes different content.
    let rewritten = engine.patternize_raw(0, 1235).unwrap();
    assert_ne!(written, rewritten);
}

#[test]
fn test_patternize_with_exclusion_leaves_the_tail() {
    let sandbox = Sandbox::new();
    let mut engine = sandbox.engine();

    let device_size = hash::device_size(&sandbox.device).unwrap();
    let written = engine.patternize_raw(4096, 77).unwrap();

    // The digest covers exactly the patterned prefix.
    let prefix = hash::hash_range(&sandbox.device, device_size - 4096).unwrap();
    assert_eq!(written, prefix);
    // The excluded tail is still the original zeros.
    let tail = fs::read(&sandbox.device).unwrap();
    assert!(tail[tail.len() - 4096..].iter().all(|&b| b == 0));
}

#[test]
fn test_convert_outcome_classification() {
    let sandbox = Sandbox::new();
    sandbox.set_suspends(1);
    let mut engine = sandbox.engine();

    // Patternize so the converter has something to shift.
    engine.patternize_raw(2 * 1024 * 1024, 9).unwrap();

    let options = ConvertOptions {
        accept_suspended: true,
        ..Default::default()
    };
    assert_eq!(engine.convert(&options).unwrap(), ConvertOutcome::Suspended);

    let resumed = ConvertOptions {
        resume: true,
        accept_suspended: true,
        ..Default::default()
    };
    assert_eq!(engine.convert(&resumed).unwrap(), ConvertOutcome::Completed);
}

#[test]
fn test_invocation_log_layout_after_a_run() {
    let sandbox = Sandbox::new();
    let mut engine = sandbox.engine();
    engine.patternize_raw(2 * 1024 * 1024, 5).unwrap();
    engine.convert(&ConvertOptions::default()).unwrap();

    // One numbered file per external invocation, with header and trailer.
    let first = fs::read_to_string(sandbox.log_dir().join("0001.log")).unwrap();
    let mut lines = first.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("-d"));
    assert!(header.contains("--i-know-what-im-doing"));
    assert!(lines.next().unwrap().starts_with("===="));
    assert!(first.trim_end().ends_with("Process returned with returncode 0"));

    let summary = fs::read_to_string(sandbox.log_dir().join("summary.txt")).unwrap();
    assert!(summary.contains("Execute:"));
}
