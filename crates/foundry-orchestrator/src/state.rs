//! Per-job state machine.
//!
//! Every mutation of a [`Job`] goes through a [`JobHandle`]. Transition
//! methods return whether they changed anything; once the job is terminal
//! they are no-ops, so late cancellations and timeouts never overwrite a
//! final status or its completion time.

use chrono::{DateTime, Utc};
use foundry_core::{
    IgnoreLock as _, IterationError, Job, JobId, JobStatus, LogEntry, Phase, TestResults,
};
use foundry_tooling::ProcessSlot;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Shared, mutex-guarded job record plus its cancellation hooks.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    record: Mutex<Job>,
    status: watch::Sender<JobStatus>,
    slot: ProcessSlot,
    watchdog: Mutex<Option<AbortHandle>>,
}

impl JobHandle {
    /// Wrap a freshly created job.
    pub fn new(job: Job) -> Self {
        let (status, _receiver) = watch::channel(job.status);
        Self {
            id: job.id,
            record: Mutex::new(job),
            status,
            slot: ProcessSlot::new(),
            watchdog: Mutex::new(None),
        }
    }

    /// Job identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Point-in-time copy of the record.
    pub fn snapshot(&self) -> Job {
        self.record.lock_ignore_poison().clone()
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        self.record.lock_ignore_poison().status
    }

    /// Whether the job reached a final status.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Iteration budget.
    pub fn max_iterations(&self) -> u32 {
        self.record.lock_ignore_poison().max_iterations
    }

    /// Output directory.
    pub fn output_path(&self) -> PathBuf {
        self.record.lock_ignore_poison().output_path.clone()
    }

    /// Cancellation latch for the job's child processes.
    pub fn slot(&self) -> &ProcessSlot {
        &self.slot
    }

    /// Append a log line.
    pub fn log<S: Into<String>>(&self, message: S) {
        let message = message.into();
        tracing::info!(job_id = %self.id, "{message}");
        self.record.lock_ignore_poison().logs.push(LogEntry {
            timestamp: Utc::now(),
            message,
        });
    }

    /// Begin iteration `iteration` (1-based), moving to `running`.
    pub fn start_iteration(&self, iteration: u32) -> bool {
        let mut job = self.record.lock_ignore_poison();
        if job.status.is_terminal() || iteration > job.max_iterations {
            return false;
        }
        let newly_running = job.status != JobStatus::Running;
        job.status = JobStatus::Running;
        job.current_iteration = iteration;
        job.progress = progress_percent(iteration, job.max_iterations);
        job.phase = format!("iteration {iteration}/{}", job.max_iterations);
        let max = job.max_iterations;
        job.logs.push(LogEntry {
            timestamp: Utc::now(),
            message: format!("Starting iteration {iteration}/{max}"),
        });
        if newly_running {
            self.status.send_replace(JobStatus::Running);
        }
        drop(job);
        tracing::info!(job_id = %self.id, iteration, max, "starting iteration");
        true
    }

    /// Update the phase label.
    pub fn set_phase(&self, phase: Phase) -> bool {
        let mut job = self.record.lock_ignore_poison();
        if job.status.is_terminal() {
            return false;
        }
        phase.label().clone_into(&mut job.phase);
        true
    }

    /// Append to the error ledger.
    pub fn record_error(&self, iteration: u32, phase: Phase, error: String) -> bool {
        let mut job = self.record.lock_ignore_poison();
        if job.status.is_terminal() {
            return false;
        }
        tracing::warn!(job_id = %self.id, iteration, phase = %phase, "phase failed");
        job.errors.push(IterationError {
            iteration,
            phase,
            error,
            timestamp: Utc::now(),
        });
        true
    }

    /// Store the latest parsed test summary; `None` clears a stale one.
    pub fn set_test_results(&self, results: Option<TestResults>) {
        self.record.lock_ignore_poison().test_results = results;
    }

    /// Store the latest validation score.
    pub fn set_validation_score(&self, score: f64) {
        self.record.lock_ignore_poison().validation_score = Some(score);
    }

    /// Move to `completed` with a summary.
    pub fn complete(&self, result: String) -> bool {
        self.finish(JobStatus::Completed, None, Some(result))
    }

    /// Move to `failed` with an error message.
    pub fn fail(&self, error: String) -> bool {
        self.finish(JobStatus::Failed, Some(error), None)
    }

    /// Move to `cancelled` and signal any running child process.
    pub fn cancel(&self, reason: &str) -> bool {
        let changed = self.finish(JobStatus::Cancelled, Some(reason.to_owned()), None);
        if changed {
            self.slot.terminate();
        }
        changed
    }

    fn finish(&self, status: JobStatus, error: Option<String>, result: Option<String>) -> bool {
        let mut job = self.record.lock_ignore_poison();
        if job.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        job.status = status;
        job.completed_at = Some(now);
        if status == JobStatus::Completed {
            job.progress = 100;
        }
        let message = match (&error, &result) {
            (Some(error), _) => format!("Job {status}: {error}"),
            (None, Some(result)) => format!("Job {status}: {result}"),
            (None, None) => format!("Job {status}"),
        };
        job.error = error;
        job.result = result;
        job.logs.push(LogEntry {
            timestamp: now,
            message: message.clone(),
        });
        // Channel and record change under the same lock.
        self.status.send_replace(status);
        drop(job);

        tracing::info!(job_id = %self.id, status = %status, "{message}");
        true
    }

    /// Whether the job finished at or before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        let job = self.record.lock_ignore_poison();
        job.status.is_terminal() && job.completed_at.is_some_and(|done| done <= cutoff)
    }

    /// Remember the watchdog so it can be stopped once the pipeline ends.
    pub fn set_watchdog(&self, handle: AbortHandle) {
        *self.watchdog.lock_ignore_poison() = Some(handle);
    }

    /// Stop the watchdog, if any.
    pub fn abort_watchdog(&self) {
        if let Some(handle) = self.watchdog.lock_ignore_poison().take() {
            handle.abort();
        }
    }

    /// Resolve with the terminal snapshot.
    pub async fn wait_terminal(&self) -> Job {
        let mut receiver = self.status.subscribe();
        // The sender is owned by `self`, so the channel cannot close here.
        if receiver.wait_for(|status| status.is_terminal()).await.is_err() {
            tracing::warn!(job_id = %self.id, "status channel closed");
        }
        self.snapshot()
    }
}

fn progress_percent(iteration: u32, max_iterations: u32) -> u8 {
    if max_iterations == 0 {
        return 0;
    }
    (u64::from(iteration.min(max_iterations)) * 100 / u64::from(max_iterations)) as u8
}
