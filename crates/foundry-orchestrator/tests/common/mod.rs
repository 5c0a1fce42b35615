//! Shared fixtures for orchestrator integration tests.

use foundry_core::{CreateRequest, FoundryConfig, Job, JobId, JobStatus, PackageSpec};
use foundry_orchestrator::Orchestrator;
use foundry_providers::MockProvider;
use foundry_tooling::{CommandOutput, CommandRunner, LogicalCommand, ScriptedRunner};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Matches the validation system prompt.
pub const REVIEW_PATTERN: &str = "senior code reviewer";

/// Matches every generation prompt.
pub const GENERATE_PATTERN: &str = "Create the package";

/// Provider output with a single source file.
pub const GENERATED_SOURCE: &str = "Here is the package.\n\n```ts src/index.ts\nexport const add = (left: number, right: number): number => left + right;\n```\n";

/// Passing review.
pub const READY_VERDICT: &str =
    r#"{"score": 92, "production_ready": true, "issues": [], "suggestions": ["add docs"]}"#;

/// Failing review.
pub const NOT_READY_VERDICT: &str = "```json\n{\"score\": 40, \"production_ready\": false, \"issues\": [\"missing input validation\"], \"suggestions\": []}\n```";

/// Vitest output for a clean run.
pub const VITEST_PASS: &str = " ✓ src/index.test.ts (3)\n\n Test Files  1 passed (1)\n      Tests  3 passed (3)\n   Duration  1.20s\n";

/// Config rooted in `root` with generous admission limits.
pub fn test_config(root: &Path) -> FoundryConfig {
    let mut config = FoundryConfig::default();
    config.orchestrator.data_root = root.join("packages");
    config.orchestrator.max_jobs_per_window = 100;
    config.orchestrator.max_tracked_jobs = 100;
    config
}

/// Provider that generates one file and approves it.
pub fn ready_provider() -> MockProvider {
    MockProvider::new()
        .with_response(REVIEW_PATTERN, READY_VERDICT)
        .with_response(GENERATE_PATTERN, GENERATED_SOURCE)
}

/// Runner where every tool succeeds and the tests report three passes.
pub fn passing_runner() -> ScriptedRunner {
    ScriptedRunner::new().with_output(LogicalCommand::Test, CommandOutput::success(VITEST_PASS))
}

/// Orchestrator wired to the scripted runner and, optionally, the mock provider.
pub fn orchestrator(
    config: FoundryConfig,
    runner: &Arc<ScriptedRunner>,
    provider: Option<&MockProvider>,
) -> Orchestrator {
    let shared: Arc<dyn CommandRunner> = Arc::<ScriptedRunner>::clone(runner);
    let mut builder = Orchestrator::builder(config).with_runner(shared);
    if let Some(provider) = provider {
        builder = builder.with_provider(Arc::new(provider.clone()));
    }
    match builder.build() {
        Ok(orchestrator) => orchestrator,
        Err(error) => panic!("orchestrator build failed: {error}"),
    }
}

/// Submit a request for `name`, panicking on admission failure.
pub fn create(orchestrator: &Orchestrator, name: &str) -> JobId {
    let spec = PackageSpec::new(name, "Adds two numbers");
    match orchestrator.create(CreateRequest::new(spec)) {
        Ok(id) => id,
        Err(error) => panic!("create {name} failed: {error}"),
    }
}

/// Wait for a terminal snapshot, bounded so a stuck job fails the test.
pub async fn wait(orchestrator: &Orchestrator, id: JobId) -> Job {
    match timeout(Duration::from_secs(20), orchestrator.wait(id)).await {
        Ok(Ok(job)) => job,
        Ok(Err(error)) => panic!("wait failed: {error}"),
        Err(_) => panic!("job {id} did not finish in time"),
    }
}

/// Poll until the job reports `running`.
pub async fn wait_running(orchestrator: &Orchestrator, id: JobId) {
    for _ in 0..500 {
        if orchestrator
            .get(id)
            .is_some_and(|job| job.status == JobStatus::Running)
        {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never started running");
}
