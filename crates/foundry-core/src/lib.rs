//! Core types and traits for the foundry package orchestrator.
//!
//! This crate provides the job data model, package specifications, the
//! generation provider trait, configuration and error handling shared by
//! every other foundry crate.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Allow for tests"
    )
)]

/// Configuration loading and defaults.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Job records, statuses and phases.
pub mod job;
/// Package specifications and creation requests.
pub mod spec;
/// Poison-tolerant lock helpers.
pub mod sync;
/// Trait definitions for generation providers.
pub mod traits;

pub use config::{
    BuildTool, FoundryConfig, HarnessConfig, InstallerConfig, OrchestratorConfig, ProviderConfig,
    ToolingConfig, WorkspaceConfig,
};
pub use error::{Error, Result};
pub use job::{IterationError, Job, JobId, JobStatus, LogEntry, Phase, TestResults};
pub use spec::{CreateRequest, PackageSpec};
pub use sync::{IgnoreLock, IgnoreRwLock};
pub use traits::{GenerationProvider, GenerationRequest};
