//! End-to-end job lifecycle through the orchestrator with scripted tools and
//! a mock provider.

#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

mod common;

use chrono::{TimeDelta, Utc};
use common::{
    GENERATE_PATTERN, NOT_READY_VERDICT, READY_VERDICT, REVIEW_PATTERN, VITEST_PASS, create,
    orchestrator, passing_runner, ready_provider, test_config, wait, wait_running,
};
use foundry_core::{CreateRequest, JobId, JobStatus, PackageSpec, Phase};
use foundry_orchestrator::{AdmissionError, Orchestrator, OrchestratorError};
use foundry_providers::MockProvider;
use foundry_tooling::{CommandOutput, CommandRunner, LogicalCommand, ScriptedRunner};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::yield_now;
use tokio::time::{self, sleep};

fn temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"))
}

#[tokio::test]
async fn test_end_to_end_single_iteration() {
    let dir = temp_dir();
    let config = test_config(dir.path());
    let data_root = config.orchestrator.data_root.clone();
    let runner = Arc::new(passing_runner());
    let provider = ready_provider();
    let orchestrator = orchestrator(config, &runner, Some(&provider));

    let id = create(&orchestrator, "acme/adder");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
    assert_eq!(job.current_iteration, 1);
    assert_eq!(job.progress, 100);
    assert!(job.errors.is_empty());
    assert!(job.completed_at.is_some());
    assert_eq!(job.validation_score, Some(92.0));
    let Some(results) = job.test_results else {
        panic!("test results should be recorded");
    };
    assert_eq!(results.failed, 0);
    assert_eq!(results.passed, 3);

    assert_eq!(job.output_path, data_root.join("acme").join("adder"));
    let source = fs::read_to_string(job.output_path.join("src").join("index.ts"))
        .unwrap_or_else(|error| panic!("generated source missing: {error}"));
    assert!(source.contains("export const add"));
    assert!(job.output_path.join("package.json").is_file());

    let commands: Vec<LogicalCommand> = runner.calls().into_iter().map(|call| call.command).collect();
    assert_eq!(
        commands,
        vec![
            LogicalCommand::Install,
            LogicalCommand::script("build"),
            LogicalCommand::script("lint"),
            LogicalCommand::Test,
        ]
    );
    assert!(runner.calls().iter().all(|call| call.working_dir == job.output_path));
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let dir = temp_dir();
    let runner = Arc::new(passing_runner());
    let provider = ready_provider();
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&provider));

    let first = create(&orchestrator, "acme/adder");
    let second = orchestrator.create(CreateRequest::new(PackageSpec::new("acme/adder", "again")));
    assert!(matches!(second, Err(AdmissionError::DuplicateArtifact(name)) if name == "acme/adder"));

    let job = wait(&orchestrator, first).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(orchestrator.list().len(), 1);

    // Still taken once the first job is finished.
    let third = orchestrator.create(CreateRequest::new(PackageSpec::new("acme/adder", "again")));
    assert!(matches!(third, Err(AdmissionError::DuplicateArtifact(_))));
}

#[tokio::test]
async fn test_traversal_name_creates_nothing() {
    let dir = temp_dir();
    let config = test_config(dir.path());
    let data_root = config.orchestrator.data_root.clone();
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    for name in ["../evil/pkg", "acme/../../etc", "acme/x/../../y"] {
        let result = orchestrator.create(CreateRequest::new(PackageSpec::new(name, "nope")));
        assert!(
            matches!(result, Err(AdmissionError::InvalidName { .. })),
            "{name} should be rejected"
        );
    }
    assert!(orchestrator.list().is_empty());
    assert!(!data_root.exists());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_build_failure_short_circuits_iteration() {
    let dir = temp_dir();
    let runner = Arc::new(
        passing_runner()
            .with_output(
                LogicalCommand::script("build"),
                CommandOutput::failure(2, "src/index.ts(1,7): error TS2304: Cannot find name 'foo'."),
            )
            .with_output(LogicalCommand::script("build"), CommandOutput::success("")),
    );
    let provider = ready_provider();
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&provider));

    let id = create(&orchestrator, "acme/adder");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_iteration, 2);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].iteration, 1);
    assert_eq!(job.errors[0].phase, Phase::Building);
    assert!(job.errors[0].error.contains("exit code 2"));
    assert!(job.errors[0].error.contains("TS2304"));

    // Lint and test only ran in the second iteration.
    assert_eq!(runner.call_count(&LogicalCommand::script("build")), 2);
    assert_eq!(runner.call_count(&LogicalCommand::script("lint")), 1);
    assert_eq!(runner.call_count(&LogicalCommand::Test), 1);

    let history = provider.call_history();
    let retry = history
        .iter()
        .filter(|request| request.prompt.contains(GENERATE_PATTERN))
        .nth(1)
        .unwrap_or_else(|| panic!("second generation request missing"));
    assert!(retry.prompt.contains("Iteration 1 (building)"));
    assert!(retry.prompt.contains("TS2304"));
}

#[tokio::test]
async fn test_budget_exhaustion_fails_job() {
    let dir = temp_dir();
    let mut config = test_config(dir.path());
    config.orchestrator.max_iterations = 2;
    let runner = Arc::new(passing_runner().with_output(
        LogicalCommand::script("lint"),
        CommandOutput::failure(1, "src/index.ts: 'unused' is declared but never used"),
    ));
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    let id = create(&orchestrator, "acme/linty");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_iteration, 2);
    let error = job.error.unwrap_or_default();
    assert!(error.starts_with("Failed after 2 iterations"), "{error}");
    assert!(error.contains("linting"));
    assert_eq!(job.errors.len(), 2);
    assert!(job.errors.iter().all(|entry| entry.phase == Phase::Linting));
    assert!(job.completed_at.is_some());
    assert_eq!(runner.call_count(&LogicalCommand::Test), 0);
}

#[tokio::test]
async fn test_failing_tests_are_recorded() {
    let dir = temp_dir();
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_output(
                LogicalCommand::Test,
                CommandOutput::failure(1, "      Tests  1 failed | 2 passed (3)\n   Duration  800ms\n"),
            )
            .with_output(LogicalCommand::Test, CommandOutput::success(VITEST_PASS)),
    );
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&ready_provider()));

    let id = create(&orchestrator, "acme/tested");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].phase, Phase::Testing);
    assert_eq!(job.test_results.map(|results| results.passed), Some(3));
}

#[tokio::test]
async fn test_validation_rejection_retries() {
    let dir = temp_dir();
    let provider = MockProvider::new()
        .with_response(REVIEW_PATTERN, NOT_READY_VERDICT)
        .with_response(REVIEW_PATTERN, READY_VERDICT)
        .with_response(GENERATE_PATTERN, common::GENERATED_SOURCE);
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&provider));

    let id = create(&orchestrator, "acme/reviewed");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_iteration, 2);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].phase, Phase::Validating);
    assert!(job.errors[0].error.contains("missing input validation"));
    assert_eq!(job.validation_score, Some(92.0));
}

#[tokio::test]
async fn test_malformed_verdict_fails_phase_only() {
    let dir = temp_dir();
    let provider = MockProvider::new()
        .with_response(REVIEW_PATTERN, "Looks great to me!")
        .with_response(REVIEW_PATTERN, READY_VERDICT)
        .with_response(GENERATE_PATTERN, common::GENERATED_SOURCE);
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&provider));

    let id = create(&orchestrator, "acme/chatty");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].phase, Phase::Validating);
}

#[tokio::test]
async fn test_provider_error_is_phase_failure() {
    let dir = temp_dir();
    let provider = MockProvider::new()
        .with_response(REVIEW_PATTERN, READY_VERDICT)
        .with_error(GENERATE_PATTERN, "overloaded")
        .with_response(GENERATE_PATTERN, common::GENERATED_SOURCE);
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&provider));

    let id = create(&orchestrator, "acme/flaky");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].phase, Phase::Generating);
    assert!(job.errors[0].error.contains("overloaded"));
}

#[tokio::test]
async fn test_missing_provider_fails_immediately() {
    let dir = temp_dir();
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(test_config(dir.path()), &runner, None);

    let id = create(&orchestrator, "acme/orphan");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_iteration, 1);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].phase, Phase::Generating);
    assert!(job.error.unwrap_or_default().contains("no generation provider"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_running_job() {
    let dir = temp_dir();
    let runner = Arc::new(passing_runner().with_delay(Duration::from_secs(30)));
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&ready_provider()));

    let id = create(&orchestrator, "acme/slow");
    wait_running(&orchestrator, id).await;

    assert!(matches!(orchestrator.cancel(id), Ok(true)));
    let job = wait(&orchestrator, id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_deref(), Some("Cancelled by request"));
    assert!(job.errors.is_empty());

    // Cancelling again changes nothing.
    assert!(matches!(orchestrator.cancel(id), Ok(false)));
    let again = orchestrator.get(id).unwrap_or_else(|| panic!("job vanished"));
    assert_eq!(again.status, JobStatus::Cancelled);
    assert_eq!(again.completed_at, job.completed_at);
}

#[tokio::test]
async fn test_cancel_terminal_and_unknown_jobs() {
    let dir = temp_dir();
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&ready_provider()));

    let id = create(&orchestrator, "acme/done");
    let job = wait(&orchestrator, id).await;
    assert!(matches!(orchestrator.cancel(id), Ok(false)));
    let after = orchestrator.get(id).unwrap_or_else(|| panic!("job vanished"));
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.completed_at, job.completed_at);

    let unknown = JobId::new();
    assert!(matches!(
        orchestrator.cancel(unknown),
        Err(OrchestratorError::JobNotFound(missing)) if missing == unknown
    ));
}

#[tokio::test]
async fn test_absolute_timeout_fails_job() {
    let dir = temp_dir();
    let mut config = test_config(dir.path());
    config.orchestrator.job_timeout_seconds = 1;
    let runner = Arc::new(passing_runner().with_delay(Duration::from_secs(30)));
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    let id = create(&orchestrator, "acme/stuck");
    let job = wait(&orchestrator, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap_or_default().contains("timed out"));
    assert!(matches!(orchestrator.cancel(id), Ok(false)));
}

#[tokio::test]
async fn test_rate_limit_counts_admissions() {
    let dir = temp_dir();
    let mut config = test_config(dir.path());
    config.orchestrator.max_jobs_per_window = 2;
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    // Rejected requests do not use up the window.
    assert!(matches!(
        orchestrator.create(CreateRequest::new(PackageSpec::new("bad", "x"))),
        Err(AdmissionError::InvalidName { .. })
    ));
    create(&orchestrator, "acme/one");
    create(&orchestrator, "acme/two");
    assert!(matches!(
        orchestrator.create(CreateRequest::new(PackageSpec::new("acme/three", "x"))),
        Err(AdmissionError::RateLimited { limit: 2, .. })
    ));
}

#[tokio::test]
async fn test_retention_sweeper_runs_on_its_own() {
    let dir = temp_dir();
    let mut config = test_config(dir.path());
    config.orchestrator.retention_days = 0;
    config.orchestrator.sweep_interval_seconds = 600;
    let runner: Arc<dyn CommandRunner> = Arc::new(passing_runner());
    let built = Orchestrator::builder(config)
        .with_runner(runner)
        .with_provider(Arc::new(ready_provider()))
        .with_retention_sweeper()
        .build();
    let orchestrator = match built {
        Ok(orchestrator) => orchestrator,
        Err(error) => panic!("orchestrator build failed: {error}"),
    };

    let id = create(&orchestrator, "acme/ephemeral");
    let job = wait(&orchestrator, id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.output_path.is_dir());

    time::pause();
    for _ in 0..50 {
        if orchestrator.get(id).is_none() {
            break;
        }
        time::advance(Duration::from_secs(600)).await;
        yield_now().await;
    }
    time::resume();

    assert!(orchestrator.get(id).is_none());
    assert!(orchestrator.list().is_empty());
    for _ in 0..200 {
        if !job.output_path.exists() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(!job.output_path.exists());
}

#[tokio::test]
async fn test_capacity_recovers_after_sweep() {
    let dir = temp_dir();
    let mut config = test_config(dir.path());
    config.orchestrator.max_tracked_jobs = 2;
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    let first = create(&orchestrator, "acme/one");
    let second = create(&orchestrator, "acme/two");
    let first_job = wait(&orchestrator, first).await;
    wait(&orchestrator, second).await;
    assert!(first_job.output_path.is_dir());

    assert!(matches!(
        orchestrator.create(CreateRequest::new(PackageSpec::new("acme/three", "x"))),
        Err(AdmissionError::CapacityExceeded { limit: 2 })
    ));

    // Nothing has aged out yet.
    assert_eq!(orchestrator.sweep_expired().await, 0);

    let later = Utc::now() + TimeDelta::days(8);
    assert_eq!(orchestrator.sweep_expired_at(later).await, 2);
    assert!(orchestrator.list().is_empty());
    assert!(orchestrator.get(first).is_none());
    assert!(!first_job.output_path.exists());

    let third = create(&orchestrator, "acme/three");
    assert_eq!(wait(&orchestrator, third).await.status, JobStatus::Completed);

    // Swept names stay registered.
    assert!(matches!(
        orchestrator.create(CreateRequest::new(PackageSpec::new("acme/one", "x"))),
        Err(AdmissionError::DuplicateArtifact(_))
    ));
}

#[tokio::test]
async fn test_ids_unique_and_records_consistent() {
    let dir = temp_dir();
    let config = test_config(dir.path());
    let data_root = config.orchestrator.data_root.clone();
    let runner = Arc::new(passing_runner());
    let orchestrator = orchestrator(config, &runner, Some(&ready_provider()));

    let ids: Vec<JobId> = (0..6)
        .map(|index| create(&orchestrator, &format!("acme/pkg-{index}")))
        .collect();
    let unique: HashSet<JobId> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());

    for job in orchestrator.list() {
        assert!(job.current_iteration <= job.max_iterations);
        assert_eq!(job.completed_at.is_some(), job.status.is_terminal());
        assert!(job.output_path.starts_with(&data_root));
        assert_ne!(job.output_path, data_root);
    }
    for id in ids {
        let job = wait(&orchestrator, id).await;
        assert!(job.current_iteration <= job.max_iterations);
        assert!(job.completed_at.is_some());
    }

    let listed = orchestrator.list();
    assert!(listed.windows(2).all(|pair| pair[0].started_at <= pair[1].started_at));
}

#[tokio::test]
async fn test_shutdown_cancels_outstanding_jobs() {
    let dir = temp_dir();
    let runner = Arc::new(passing_runner().with_delay(Duration::from_secs(30)));
    let orchestrator = orchestrator(test_config(dir.path()), &runner, Some(&ready_provider()));

    let first = create(&orchestrator, "acme/one");
    let second = create(&orchestrator, "acme/two");
    assert_eq!(orchestrator.shutdown(), 2);
    assert_eq!(orchestrator.shutdown(), 0);

    for id in [first, second] {
        let job = wait(&orchestrator, id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
