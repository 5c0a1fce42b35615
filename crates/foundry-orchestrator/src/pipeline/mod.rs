//! Iteration pipeline: generate, build, lint, test and validate until the
//! package passes or the iteration budget runs out.
//!
//! Stages report phase failures as [`StageOutcome`] values, which go into
//! the job's error ledger and feed the next generation prompt. An `Err` from
//! a stage is unrecoverable and fails the job on the spot.

/// Stage implementations.
pub mod stages;

use async_trait::async_trait;
use foundry_core::{FoundryConfig, GenerationProvider, Phase};
use foundry_tooling::{CommandOutput, CommandRunner, LogicalCommand, TestReportParser, tail_str};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::installer::PluginInstaller;
use crate::state::JobHandle;
use crate::workspace::{WorkspaceManager, clear_artifacts};
use stages::{BuildStage, GenerateStage, LintStage, TestStage, ValidateStage};

/// Result of a stage that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether the phase passed.
    pub passed: bool,
    /// Summary on success, error detail on failure.
    pub detail: String,
}

impl StageOutcome {
    /// Passing outcome.
    pub fn passed<S: Into<String>>(detail: S) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    /// Failing outcome; `detail` is recorded in the error ledger.
    pub fn failed<S: Into<String>>(detail: S) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Knobs the stages read.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Script run by the build stage.
    pub build_script: String,
    /// Script run by the lint stage.
    pub lint_script: String,
    /// Directories removed between iterations.
    pub artifact_dirs: Vec<PathBuf>,
    /// Bound on ledger detail text.
    pub error_detail_bytes: usize,
    /// Provider model.
    pub model: String,
    /// Token limit for generation.
    pub max_tokens: u32,
    /// Token limit for validation.
    pub validation_max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl PipelineSettings {
    /// Pull the pipeline knobs out of the full configuration.
    pub fn from_config(config: &FoundryConfig) -> Self {
        Self {
            build_script: config.tooling.build_script.clone(),
            lint_script: config.tooling.lint_script.clone(),
            artifact_dirs: config.tooling.artifact_dirs.clone(),
            error_detail_bytes: config.orchestrator.error_detail_bytes,
            model: config.provider.model.clone(),
            max_tokens: config.provider.max_tokens,
            validation_max_tokens: config.provider.validation_max_tokens,
            temperature: config.provider.temperature,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&FoundryConfig::default())
    }
}

/// Collaborators shared by every job.
pub struct PipelineEnv {
    /// Runs build tools.
    pub runner: Arc<dyn CommandRunner>,
    /// Generates and reviews source; optional.
    pub provider: Option<Arc<dyn GenerationProvider>>,
    /// Seeds output directories.
    pub workspace: Arc<dyn WorkspaceManager>,
    /// Parses test runner output.
    pub reports: Arc<dyn TestReportParser>,
    /// Stage knobs.
    pub settings: PipelineSettings,
}

/// Everything a stage sees while it runs.
pub struct StageContext<'run> {
    /// The job being worked on.
    pub job: &'run JobHandle,
    /// Current iteration, 1-based.
    pub iteration: u32,
    /// Shared collaborators.
    pub env: &'run PipelineEnv,
    /// Job output directory.
    pub output_path: PathBuf,
}

impl StageContext<'_> {
    /// Run `command` in the job's directory on the job's process slot.
    pub async fn run_command(&self, command: &LogicalCommand, description: &str) -> CommandOutput {
        self.job.log(format!("Running {description}"));
        self.env
            .runner
            .run(&self.output_path, command, description, self.job.slot())
            .await
    }

    /// Failure detail for a command: a header line plus the tail of its output.
    pub fn command_failure(&self, label: &str, output: &CommandOutput) -> String {
        let header = match (output.timed_out, output.exit_code) {
            (true, _) => format!("{label} timed out"),
            (false, Some(code)) => format!("{label} failed with exit code {code}"),
            (false, None) => format!("{label} failed"),
        };
        let budget = self
            .env
            .settings
            .error_detail_bytes
            .saturating_sub(header.len() + 1);
        format!("{header}\n{}", output.tail(budget).trim_end())
    }
}

/// One step of an iteration.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Phase this stage reports under.
    fn phase(&self) -> Phase;

    /// Run the stage.
    ///
    /// # Errors
    /// Returns an error only for unrecoverable problems; ordinary failures
    /// are `Ok(StageOutcome::failed(..))`.
    async fn run(&self, context: &StageContext<'_>) -> Result<StageOutcome>;
}

enum IterationResult {
    Passed,
    Failed { phase: Phase, detail: String },
    Stopped,
}

/// Runs the iteration loop for a job.
pub struct IterationPipeline {
    stages: Vec<Box<dyn Stage>>,
    env: PipelineEnv,
    installer: Option<Arc<dyn PluginInstaller>>,
}

impl IterationPipeline {
    /// Pipeline with the standard stages in order.
    pub fn new(env: PipelineEnv, installer: Option<Arc<dyn PluginInstaller>>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(GenerateStage),
            Box::new(BuildStage),
            Box::new(LintStage),
            Box::new(TestStage),
            Box::new(ValidateStage),
        ];
        Self {
            stages,
            env,
            installer,
        }
    }

    /// Shared collaborators.
    pub fn env(&self) -> &PipelineEnv {
        &self.env
    }

    /// Drive `job` to a terminal status.
    pub async fn run(&self, job: &JobHandle) {
        let max_iterations = job.max_iterations();
        if max_iterations == 0 {
            job.fail("No iterations allowed (max_iterations is 0)".to_owned());
            return;
        }

        let mut last_failure = String::new();
        for iteration in 1..=max_iterations {
            if !job.start_iteration(iteration) {
                return;
            }
            match self.run_iteration(job, iteration).await {
                IterationResult::Passed => {
                    self.finish(job, iteration).await;
                    return;
                }
                IterationResult::Failed { phase, detail } => {
                    let first_line = detail.lines().next().unwrap_or_default();
                    last_failure = format!("{phase} failed: {first_line}");
                    if iteration < max_iterations {
                        job.log(format!(
                            "Iteration {iteration}/{max_iterations} failed during {phase}, retrying"
                        ));
                        self.reset_artifacts(job).await;
                    }
                }
                IterationResult::Stopped => return,
            }
        }
        job.fail(format!(
            "Failed after {max_iterations} iterations: {last_failure}"
        ));
    }

    async fn run_iteration(&self, job: &JobHandle, iteration: u32) -> IterationResult {
        let context = StageContext {
            job,
            iteration,
            env: &self.env,
            output_path: job.output_path(),
        };
        for stage in &self.stages {
            let phase = stage.phase();
            if !job.set_phase(phase) {
                return IterationResult::Stopped;
            }
            match stage.run(&context).await {
                Ok(outcome) if outcome.passed => {
                    if !outcome.detail.is_empty() {
                        job.log(format!("{phase}: {}", outcome.detail));
                    }
                }
                Ok(outcome) => {
                    let detail =
                        tail_str(&outcome.detail, self.env.settings.error_detail_bytes).to_owned();
                    job.record_error(iteration, phase, detail.clone());
                    return IterationResult::Failed { phase, detail };
                }
                Err(error) => {
                    job.record_error(iteration, phase, error.to_string());
                    job.fail(format!("Unrecoverable error during {phase}: {error}"));
                    return IterationResult::Stopped;
                }
            }
        }
        if job.is_terminal() {
            IterationResult::Stopped
        } else {
            IterationResult::Passed
        }
    }

    async fn reset_artifacts(&self, job: &JobHandle) {
        let output_path = job.output_path();
        if let Err(error) = clear_artifacts(&output_path, &self.env.settings.artifact_dirs).await {
            tracing::warn!(job_id = %job.id(), %error, "could not clear build artifacts");
            job.log(format!("Could not clear build artifacts: {error}"));
        }
    }

    async fn finish(&self, job: &JobHandle, iteration: u32) {
        let output_path = job.output_path();
        if let Some(installer) = &self.installer {
            match installer.install(&output_path).await {
                Ok(()) => job.log("Package installed"),
                Err(error) => job.log(format!("Install failed: {error}")),
            }
        }

        let snapshot = job.snapshot();
        let mut summary = format!(
            "Package {} generated at {} in {iteration} iteration(s)",
            snapshot.spec.name,
            output_path.display()
        );
        if let Some(results) = snapshot.test_results {
            let _ignored = write!(
                summary,
                "; tests: {} passed, {} skipped",
                results.passed, results.skipped
            );
        }
        if let Some(score) = snapshot.validation_score {
            let _ignored = write!(summary, "; validation score {score:.0}");
        }
        job.complete(summary);
    }
}
