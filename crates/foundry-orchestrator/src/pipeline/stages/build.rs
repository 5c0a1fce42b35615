use async_trait::async_trait;
use foundry_core::Phase;
use foundry_tooling::LogicalCommand;

use crate::error::Result;
use crate::pipeline::{Stage, StageContext, StageOutcome};

/// Installs dependencies, then runs the build script.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStage;

#[async_trait]
impl Stage for BuildStage {
    fn phase(&self) -> Phase {
        Phase::Building
    }

    async fn run(&self, context: &StageContext<'_>) -> Result<StageOutcome> {
        let install = context
            .run_command(&LogicalCommand::Install, "dependency install")
            .await;
        if !install.success {
            return Ok(StageOutcome::failed(
                context.command_failure("Dependency install", &install),
            ));
        }

        let script = &context.env.settings.build_script;
        let build = context
            .run_command(&LogicalCommand::script(script.as_str()), "build")
            .await;
        if !build.success {
            return Ok(StageOutcome::failed(context.command_failure("Build", &build)));
        }

        Ok(StageOutcome::passed(format!(
            "Build succeeded ({}ms)",
            install.duration_ms + build.duration_ms
        )))
    }
}
