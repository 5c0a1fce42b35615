//! Job registry and lifecycle.
//!
//! Admission runs under the governor lock with the job map locked for
//! writing, so the capacity count and the name registry always agree. Each
//! admitted job gets its own pipeline task plus a watchdog that fails it
//! once the absolute timeout elapses.

use chrono::{DateTime, Utc};
use core::result::Result as CoreResult;
use foundry_core::{
    CreateRequest, FoundryConfig, GenerationProvider, IgnoreLock as _, IgnoreRwLock as _, Job,
    JobId,
};
use foundry_tooling::{ChainedReportParser, CommandRunner, ProcessHarness, TestReportParser};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::absolute;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::fs::remove_dir_all;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};

use crate::error::{AdmissionError, OrchestratorError, Result};
use crate::governor::{Governor, RateLimiter};
use crate::installer::{CommandInstaller, PluginInstaller};
use crate::pipeline::{IterationPipeline, PipelineEnv, PipelineSettings};
use crate::state::JobHandle;
use crate::workspace::{TemplateWorkspace, WorkspaceManager};

/// Reason recorded on jobs cancelled through [`Orchestrator::cancel`].
pub const CANCEL_REASON: &str = "Cancelled by request";

/// Reason recorded on jobs cancelled by [`Orchestrator::shutdown`].
pub const SHUTDOWN_REASON: &str = "Cancelled: orchestrator shutting down";

struct Inner {
    config: FoundryConfig,
    governor: Mutex<Governor>,
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    pipeline: IterationPipeline,
}

/// Accepts creation requests and runs each admitted job in the background.
///
/// Cloning is cheap; clones share the same job registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Start building an orchestrator from `config`.
    pub fn builder(config: FoundryConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Configuration in effect, with an absolute data root.
    pub fn config(&self) -> &FoundryConfig {
        &self.inner.config
    }

    /// Admit a request and start its pipeline. Returns as soon as the job exists.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// # Errors
    /// Returns the first admission check that failed; no job is created then.
    pub fn create(&self, request: CreateRequest) -> CoreResult<JobId, AdmissionError> {
        let handle = self.admit(request)?;
        let id = handle.id();
        self.spawn_job(handle);
        Ok(id)
    }

    fn admit(&self, request: CreateRequest) -> CoreResult<Arc<JobHandle>, AdmissionError> {
        let mut governor = self.inner.governor.lock_ignore_poison();
        let mut jobs = self.inner.jobs.write_ignore_poison();
        let output_path = governor.admit(&request.spec.name, jobs.len(), Instant::now())?;

        let name = request.spec.name.clone();
        let job = Job::new(
            request.spec,
            output_path,
            self.inner.config.orchestrator.max_iterations,
            request.use_template,
        );
        let handle = Arc::new(JobHandle::new(job));
        jobs.insert(handle.id(), Arc::clone(&handle));
        drop(jobs);
        drop(governor);

        handle.log(format!(
            "Job created for {name} at {}",
            handle.output_path().display()
        ));
        Ok(handle)
    }

    fn spawn_job(&self, handle: Arc<JobHandle>) {
        let timeout = self.inner.config.orchestrator.job_timeout();
        let watched = Arc::clone(&handle);
        let watchdog = tokio::spawn(async move {
            sleep(timeout).await;
            if watched.fail(format!("Job timed out after {}s", timeout.as_secs())) {
                tracing::warn!(job_id = %watched.id(), "job hit the absolute timeout");
            }
        });
        handle.set_watchdog(watchdog.abort_handle());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.pipeline.run(&handle).await;
            handle.abort_watchdog();
        });
    }

    fn handle(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.inner.jobs.read_ignore_poison().get(&id).cloned()
    }

    fn handles(&self) -> Vec<Arc<JobHandle>> {
        self.inner
            .jobs
            .read_ignore_poison()
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of a job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// Snapshots of every tracked job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .handles()
            .iter()
            .map(|handle| handle.snapshot())
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    /// Cancel a pending or running job. `Ok(false)` if it already finished.
    ///
    /// # Errors
    /// Returns `JobNotFound` for unknown ids.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let handle = self.handle(id).ok_or(OrchestratorError::JobNotFound(id))?;
        let changed = handle.cancel(CANCEL_REASON);
        if changed {
            handle.abort_watchdog();
        }
        Ok(changed)
    }

    /// Wait for a job to reach a terminal status.
    ///
    /// # Errors
    /// Returns `JobNotFound` for unknown ids.
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let handle = self.handle(id).ok_or(OrchestratorError::JobNotFound(id))?;
        Ok(handle.wait_terminal().await)
    }

    /// Remove jobs whose retention window has passed. Returns how many.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Remove jobs that finished more than the retention window before `now`.
    ///
    /// Output directories are deleted best-effort; failures are logged.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let retention = self.inner.config.orchestrator.retention();
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };

        let expired: Vec<Arc<JobHandle>> = {
            let mut jobs = self.inner.jobs.write_ignore_poison();
            let ids: Vec<JobId> = jobs
                .iter()
                .filter(|(_, handle)| handle.finished_before(cutoff))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for handle in &expired {
            let output_path = handle.output_path();
            if let Err(error) = remove_dir_all(&output_path).await
                && error.kind() != ErrorKind::NotFound
            {
                tracing::warn!(
                    job_id = %handle.id(),
                    path = %output_path.display(),
                    %error,
                    "could not delete expired output directory"
                );
            }
            tracing::info!(job_id = %handle.id(), "expired job swept");
        }
        expired.len()
    }

    /// Run the retention sweep every `period`.
    ///
    /// The task holds only a weak reference and ends once every clone of the
    /// orchestrator has been dropped, or when the returned handle is aborted.
    pub fn spawn_retention_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = period.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = Self { inner }.sweep_expired().await;
                if removed > 0 {
                    tracing::info!(removed, "retention sweep finished");
                }
            }
        })
    }

    /// Cancel every outstanding job. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let mut cancelled = 0;
        for handle in self.handles() {
            if handle.cancel(SHUTDOWN_REASON) {
                handle.abort_watchdog();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelled outstanding jobs on shutdown");
        }
        cancelled
    }
}

/// Assembles an [`Orchestrator`] from config plus optional collaborators.
///
/// Anything not supplied falls back to the real implementation: the process
/// harness, the template workspace, the chained report parser and, when
/// `[installer]` names a command, the command installer. There is no
/// default provider.
pub struct OrchestratorBuilder {
    config: FoundryConfig,
    provider: Option<Arc<dyn GenerationProvider>>,
    runner: Option<Arc<dyn CommandRunner>>,
    workspace: Option<Arc<dyn WorkspaceManager>>,
    installer: Option<Arc<dyn PluginInstaller>>,
    reports: Option<Arc<dyn TestReportParser>>,
    retention_sweeper: bool,
}

impl OrchestratorBuilder {
    /// Builder with every collaborator left at its default.
    pub fn new(config: FoundryConfig) -> Self {
        Self {
            config,
            provider: None,
            runner: None,
            workspace: None,
            installer: None,
            reports: None,
            retention_sweeper: false,
        }
    }

    /// Provider used for generation and validation.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Command runner replacing the process harness.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Workspace manager replacing the template workspace.
    #[must_use]
    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceManager>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Installer called on completion.
    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Test report parser.
    #[must_use]
    pub fn with_report_parser(mut self, reports: Arc<dyn TestReportParser>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Sweep expired jobs every `orchestrator.sweep_interval_seconds` once built.
    /// [`build`](Self::build) must then run inside a tokio runtime.
    #[must_use]
    pub fn with_retention_sweeper(mut self) -> Self {
        self.retention_sweeper = true;
        self
    }

    /// Build the orchestrator.
    ///
    /// # Errors
    /// Returns an error if the data root cannot be made absolute.
    pub fn build(self) -> Result<Orchestrator> {
        let mut config = self.config;
        config.orchestrator.data_root = absolute(&config.orchestrator.data_root)?;
        let data_root = config.orchestrator.data_root.clone();

        let harness = Arc::new(ProcessHarness::new(
            config.harness.clone(),
            &config.tooling,
        ));
        let runner: Arc<dyn CommandRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::clone(&harness) as Arc<dyn CommandRunner>,
        };
        let installer = self.installer.or_else(|| {
            CommandInstaller::from_config(&config.installer, Arc::clone(&harness))
                .map(|installer| Arc::new(installer) as Arc<dyn PluginInstaller>)
        });
        let workspace = self.workspace.unwrap_or_else(|| {
            Arc::new(TemplateWorkspace::new(config.workspace.template_dir.clone()))
        });
        let reports = self
            .reports
            .unwrap_or_else(|| Arc::new(ChainedReportParser::default()));

        let env = PipelineEnv {
            runner,
            provider: self.provider,
            workspace,
            reports,
            settings: PipelineSettings::from_config(&config),
        };
        let governor = Governor::new(
            data_root,
            RateLimiter::new(
                config.orchestrator.max_jobs_per_window,
                config.orchestrator.rate_window(),
            ),
            config.orchestrator.max_tracked_jobs,
        );

        tracing::debug!(
            data_root = %config.orchestrator.data_root.display(),
            "orchestrator ready"
        );
        let sweep_interval = config.orchestrator.sweep_interval();
        let orchestrator = Orchestrator {
            inner: Arc::new(Inner {
                config,
                governor: Mutex::new(governor),
                jobs: RwLock::new(HashMap::new()),
                pipeline: IterationPipeline::new(env, installer),
            }),
        };
        if self.retention_sweeper {
            drop(orchestrator.spawn_retention_sweeper(sweep_interval));
        }
        Ok(orchestrator)
    }
}
