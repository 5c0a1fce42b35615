use async_trait::async_trait;
use foundry_core::Phase;
use foundry_tooling::LogicalCommand;

use crate::error::Result;
use crate::pipeline::{Stage, StageContext, StageOutcome};

/// Runs the lint script.
#[derive(Debug, Clone, Copy, Default)]
pub struct LintStage;

#[async_trait]
impl Stage for LintStage {
    fn phase(&self) -> Phase {
        Phase::Linting
    }

    async fn run(&self, context: &StageContext<'_>) -> Result<StageOutcome> {
        let script = &context.env.settings.lint_script;
        let lint = context
            .run_command(&LogicalCommand::script(script.as_str()), "lint")
            .await;
        if lint.success {
            Ok(StageOutcome::passed("Lint clean"))
        } else {
            Ok(StageOutcome::failed(context.command_failure("Lint", &lint)))
        }
    }
}
