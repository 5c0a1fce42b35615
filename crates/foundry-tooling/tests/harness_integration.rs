//! Real child processes through the harness.
#![cfg(unix)]
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use foundry_core::{BuildTool, HarnessConfig, ToolingConfig};
use foundry_tooling::{
    CommandRunner as _, LogicalCommand, ProcessHarness, ProcessSlot, TIMEOUT_MARKER,
    TRUNCATION_MARKER, ToolResolver,
};
use std::fs::{Permissions, set_permissions, write};
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::time::sleep;

fn harness_with(config: HarnessConfig) -> ProcessHarness {
    ProcessHarness::new(config, &ToolingConfig::default())
}

fn harness() -> ProcessHarness {
    harness_with(HarnessConfig::default())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|arg| (*arg).to_owned()).collect()
}

fn scratch() -> TempDir {
    TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"))
}

#[tokio::test]
async fn test_successful_command_captures_stdout() {
    let dir = scratch();
    let output = harness()
        .run_program(dir.path(), "echo", &args(&["hello"]), "echo", &ProcessSlot::new())
        .await;

    assert!(output.success, "unexpected failure: {}", output.output);
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.output.trim(), "hello");
    assert!(!output.timed_out);
}

#[tokio::test]
async fn test_non_zero_exit_is_failure_with_stderr() {
    let dir = scratch();
    let output = harness()
        .run_program(
            dir.path(),
            "sh",
            &args(&["-c", "echo oops 1>&2; exit 3"]),
            "failing script",
            &ProcessSlot::new(),
        )
        .await;

    assert!(!output.success);
    assert_eq!(output.exit_code, Some(3));
    assert!(output.output.contains("oops"));
}

#[tokio::test]
async fn test_missing_binary_is_reported_not_raised() {
    let dir = scratch();
    let output = harness()
        .run_program(
            dir.path(),
            "foundry-definitely-missing-binary",
            &[],
            "missing tool",
            &ProcessSlot::new(),
        )
        .await;

    assert!(!output.success);
    assert_eq!(output.exit_code, None);
    assert!(output.output.contains("command not found"), "got: {}", output.output);
}

#[tokio::test]
async fn test_timeout_terminates_child() {
    let dir = scratch();
    let config = HarnessConfig {
        command_timeout_seconds: 1,
        termination_grace_seconds: 5,
        ..HarnessConfig::default()
    };
    let started = Instant::now();
    let output = harness_with(config)
        .run_program(dir.path(), "sleep", &args(&["30"]), "sleep", &ProcessSlot::new())
        .await;

    assert!(!output.success);
    assert!(output.timed_out);
    assert!(output.output.ends_with(TIMEOUT_MARKER));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[tokio::test]
async fn test_output_is_capped_with_single_marker() {
    let dir = scratch();
    let config = HarnessConfig {
        max_output_bytes: 1000,
        ..HarnessConfig::default()
    };
    let output = harness_with(config)
        .run_program(
            dir.path(),
            "head",
            &args(&["-c", "50000", "/dev/zero"]),
            "flood",
            &ProcessSlot::new(),
        )
        .await;

    assert!(output.success);
    assert_eq!(output.output.matches(TRUNCATION_MARKER).count(), 1);
    assert!(output.output.len() <= 1000 + 1 + TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn test_environment_is_explicit() {
    let dir = scratch();
    let output = harness()
        .run_program(dir.path(), "env", &[], "env", &ProcessSlot::new())
        .await;

    assert!(output.success);
    assert!(output.output.lines().any(|line| line == "CI=1"));
    assert!(
        output
            .output
            .lines()
            .any(|line| line.starts_with("PATH=/usr/local/bin:/opt/homebrew/bin:/usr/bin:/bin"))
    );
}

#[tokio::test]
async fn test_runs_in_working_directory() {
    let dir = scratch();
    let output = harness()
        .run_program(dir.path(), "pwd", &[], "pwd", &ProcessSlot::new())
        .await;

    let reported = PathBuf::from(output.output.trim());
    let expected = dir.path().canonicalize().unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(reported.canonicalize().ok(), Some(expected));
}

#[tokio::test]
async fn test_cancellation_signals_running_child() {
    let dir = scratch();
    let harness = harness();
    let slot = ProcessSlot::new();
    let sleep_args = args(&["30"]);
    let started = Instant::now();

    let (output, ()) = tokio::join!(
        harness.run_program(dir.path(), "sleep", &sleep_args, "sleep", &slot),
        async {
            sleep(Duration::from_millis(200)).await;
            slot.terminate();
        }
    );

    assert!(!output.success);
    assert!(!output.timed_out);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(slot.active_pid(), None);
}

fn install_fake_npm(dir: &Path) {
    let path = dir.join("npm");
    if let Err(error) = write(&path, "#!/bin/sh\necho \"fake-npm $*\"\n") {
        panic!("write fake npm: {error}");
    }
    if let Err(error) = set_permissions(&path, Permissions::from_mode(0o755)) {
        panic!("chmod fake npm: {error}");
    }
}

#[tokio::test]
async fn test_logical_command_goes_through_resolver() {
    let tools = scratch();
    let workdir = scratch();
    install_fake_npm(tools.path());

    let tooling = ToolingConfig {
        preference: vec![BuildTool::Npm],
        ..ToolingConfig::default()
    };
    let resolver = ToolResolver::new(
        &tooling,
        vec![
            tools.path().to_path_buf(),
            PathBuf::from("/usr/bin"),
            PathBuf::from("/bin"),
        ],
    );
    let harness = ProcessHarness::with_resolver(HarnessConfig::default(), resolver);

    let output = harness
        .run(
            workdir.path(),
            &LogicalCommand::script("build"),
            "build",
            &ProcessSlot::new(),
        )
        .await;

    assert!(output.success, "unexpected failure: {}", output.output);
    assert_eq!(output.output.trim(), "fake-npm run build");
}
