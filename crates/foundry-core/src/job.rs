//! Job data model shared by the orchestrator and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::PackageSpec;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not yet iterating.
    Pending,
    /// At least one iteration in progress or about to start.
    Running,
    /// An iteration passed every phase.
    Completed,
    /// Budget exhausted, fatal error or timeout.
    Failed,
    /// Cancelled by a caller or by shutdown.
    Cancelled,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        formatter.write_str(label)
    }
}

/// One of the five pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Source generation through the provider.
    Generating,
    /// Dependency install and build.
    Building,
    /// Static analysis.
    Linting,
    /// Test suite.
    Testing,
    /// Production-readiness review.
    Validating,
}

impl Phase {
    /// Lowercase label used in job snapshots and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Building => "building",
            Self::Linting => "linting",
            Self::Testing => "testing",
            Self::Validating => "validating",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was written.
    pub timestamp: DateTime<Utc>,
    /// Log text.
    pub message: String,
}

/// Error ledger record: one per failed phase per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationError {
    /// Iteration the failure happened in (1-based).
    pub iteration: u32,
    /// Failing phase.
    pub phase: Phase,
    /// Failure detail.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Summary parsed out of a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    /// Passing tests.
    pub passed: u32,
    /// Failing tests.
    pub failed: u32,
    /// Skipped or pending tests.
    pub skipped: u32,
    /// Reported wall time in milliseconds.
    pub duration_ms: u64,
}

impl TestResults {
    /// Total number of tests the runner reported.
    pub fn total(&self) -> u32 {
        self.passed
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }
}

/// Snapshot of a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Immutable identifier.
    pub id: JobId,
    /// What the job is building.
    pub spec: PackageSpec,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Current phase label.
    pub phase: String,
    /// Progress percentage derived from the iteration counter.
    pub progress: u8,
    /// Append-only log.
    pub logs: Vec<LogEntry>,
    /// Terminal error message.
    pub error: Option<String>,
    /// Result summary on success.
    pub result: Option<String>,
    /// Iteration currently running (0 before the first round).
    pub current_iteration: u32,
    /// Iteration budget.
    pub max_iterations: u32,
    /// Error ledger.
    pub errors: Vec<IterationError>,
    /// Last parsed test summary.
    pub test_results: Option<TestResults>,
    /// Last validation score (0-100).
    pub validation_score: Option<f64>,
    /// Directory the package is generated into.
    pub output_path: PathBuf,
    /// Whether the workspace starts from the template.
    pub use_template: bool,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Set once, on the terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job record.
    pub fn new(
        spec: PackageSpec,
        output_path: PathBuf,
        max_iterations: u32,
        use_template: bool,
    ) -> Self {
        Self {
            id: JobId::new(),
            spec,
            status: JobStatus::Pending,
            phase: "queued".to_owned(),
            progress: 0,
            logs: Vec::new(),
            error: None,
            result: None,
            current_iteration: 0,
            max_iterations,
            errors: Vec::new(),
            test_results: None,
            validation_score: None,
            output_path,
            use_template,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the job reached a final status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
