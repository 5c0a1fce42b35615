use core::result::Result as CoreResult;
use std::io::Error as IoError;
use std::path::PathBuf;

use foundry_core::{Error as CoreError, JobId};
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = CoreResult<T, OrchestratorError>;

/// Reasons a creation request is refused before any job exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// An artifact with this name was already created in this process.
    #[error("an artifact named '{0}' was already created")]
    DuplicateArtifact(String),

    /// The name is not a safe `scope/name` pair.
    #[error("invalid artifact name '{name}': {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Too many jobs were admitted in the current window.
    #[error("rate limit exceeded: at most {limit} jobs per {window_seconds}s")]
    RateLimited {
        /// Admissions allowed per window.
        limit: u32,
        /// Window length in seconds.
        window_seconds: u64,
    },

    /// Too many jobs are tracked, regardless of status.
    #[error("capacity exceeded: {limit} jobs are already tracked")]
    CapacityExceeded {
        /// Tracked job limit.
        limit: usize,
    },

    /// The computed output directory is not inside the data root.
    #[error("output path {} escapes the data root", path.display())]
    UnsafeOutputPath {
        /// Offending path.
        path: PathBuf,
    },
}

/// Errors raised by the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A creation request was refused.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Error from the core library.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// No job with this id is tracked.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// Workspace preparation failed.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Plugin installation failed.
    #[error("install error: {0}")]
    Install(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}
