//! Job orchestration for generated npm packages.
//!
//! This crate provides:
//!
//! - **Admission**: name rules, rate limiting, capacity and output path sandboxing
//! - **Job State**: per-job state machine with cancellation and timeouts
//! - **Iteration Pipeline**: generate, build, lint, test and validate until the package passes
//!
//! # Example
//!
//! ```no_run
//! use foundry_core::{CreateRequest, FoundryConfig, PackageSpec};
//! use foundry_orchestrator::Orchestrator;
//! use foundry_providers::AnthropicProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::builder(FoundryConfig::default())
//!     .with_provider(Arc::new(AnthropicProvider::from_env()?))
//!     .build()?;
//! let spec = PackageSpec::new("acme/weather", "Fetch weather forecasts");
//! let id = orchestrator.create(CreateRequest::new(spec))?;
//! let job = orchestrator.wait(id).await?;
//! println!("{}: {:?}", job.status, job.result);
//! # Ok(())
//! # }
//! ```
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

/// Prompt building and provider response parsing.
pub mod codegen;
/// Error types.
pub mod error;
/// Admission control.
pub mod governor;
/// Completed package hand-off.
pub mod installer;
/// Job registry and lifecycle.
pub mod orchestrator;
/// Iteration loop and stages.
pub mod pipeline;
/// Per-job state machine.
pub mod state;
/// Output directory preparation.
pub mod workspace;

pub use codegen::{GeneratedFile, ValidationVerdict};
pub use error::{AdmissionError, OrchestratorError, Result};
pub use governor::{Governor, RateLimiter};
pub use installer::{CommandInstaller, PluginInstaller};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use pipeline::{
    IterationPipeline, PipelineEnv, PipelineSettings, Stage, StageContext, StageOutcome,
};
pub use state::JobHandle;
pub use workspace::{TemplateWorkspace, WorkspaceManager, WorkspaceOrigin};
