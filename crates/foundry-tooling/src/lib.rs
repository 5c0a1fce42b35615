//! Sandboxed process execution for the foundry pipeline.
//!
//! This crate provides:
//! - `ProcessHarness` for running build tools with timeouts and bounded output
//! - `ToolResolver` for picking an installed package manager
//! - Test report parsers for Jest, Vitest and libtest output
//! - `ScriptedRunner`, a `CommandRunner` double for tests
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
        reason = "Allow for tests"
    )
)]

/// Logical commands and their concrete invocations.
mod command;
/// Child process execution with limits.
pub mod harness;
/// Test runner output parsing.
pub mod report;
/// Build tool detection.
mod resolver;
/// Scripted command runner.
pub mod scripted;

pub use command::{LogicalCommand, ToolInvocation};
pub use harness::{
    CommandOutput, CommandRunner, ProcessHarness, ProcessSlot, TIMEOUT_MARKER, TRUNCATION_MARKER,
    build_search_path, tail_str,
};
pub use report::{ChainedReportParser, JestReportParser, LibtestReportParser, TestReportParser};
pub use resolver::{ToolResolver, find_executable};
pub use scripted::{RecordedCall, ScriptedRunner};
