use async_trait::async_trait;
use foundry_core::{GenerationRequest, Phase};
use tokio::task::spawn_blocking;

use crate::codegen::{VALIDATION_SYSTEM_PROMPT, collect_sources, parse_verdict, validation_prompt};
use crate::error::{OrchestratorError, Result};
use crate::pipeline::{Stage, StageContext, StageOutcome};

/// Asks the provider for a production-readiness verdict.
///
/// Without a provider the stage passes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateStage;

#[async_trait]
impl Stage for ValidateStage {
    fn phase(&self) -> Phase {
        Phase::Validating
    }

    async fn run(&self, context: &StageContext<'_>) -> Result<StageOutcome> {
        let Some(provider) = &context.env.provider else {
            return Ok(StageOutcome::passed(
                "Validation skipped: no provider configured",
            ));
        };

        let root = context.output_path.clone();
        let files = spawn_blocking(move || collect_sources(&root))
            .await
            .map_err(|error| OrchestratorError::Other(format!("source scan failed: {error}")))?;

        let settings = &context.env.settings;
        let spec = context.job.snapshot().spec;
        let request = GenerationRequest::new(
            &settings.model,
            VALIDATION_SYSTEM_PROMPT,
            validation_prompt(&spec, &files),
        )
        .with_max_tokens(settings.validation_max_tokens)
        .with_temperature(settings.temperature);

        let response = match provider.generate(&request).await {
            Ok(response) => response,
            Err(error) => {
                return Ok(StageOutcome::failed(format!(
                    "Validation request failed: {error}"
                )));
            }
        };
        let verdict = match parse_verdict(&response) {
            Ok(verdict) => verdict,
            Err(reason) => return Ok(StageOutcome::failed(reason)),
        };

        context.job.set_validation_score(verdict.score);
        if verdict.production_ready {
            Ok(StageOutcome::passed(format!(
                "Production ready (score {:.0})",
                verdict.score
            )))
        } else {
            Ok(StageOutcome::failed(verdict.failure_detail()))
        }
    }
}
