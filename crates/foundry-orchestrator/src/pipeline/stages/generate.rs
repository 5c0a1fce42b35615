use async_trait::async_trait;
use foundry_core::{GenerationRequest, Phase};

use crate::codegen::{GENERATION_SYSTEM_PROMPT, generation_prompt, parse_code_blocks, write_files};
use crate::error::{OrchestratorError, Result};
use crate::pipeline::{Stage, StageContext, StageOutcome};

/// Seeds the workspace on the first iteration, then writes provider output
/// under `src/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateStage;

#[async_trait]
impl Stage for GenerateStage {
    fn phase(&self) -> Phase {
        Phase::Generating
    }

    async fn run(&self, context: &StageContext<'_>) -> Result<StageOutcome> {
        let Some(provider) = &context.env.provider else {
            return Err(OrchestratorError::Other(
                "no generation provider is configured".to_owned(),
            ));
        };
        let job = context.job.snapshot();

        if context.iteration == 1 {
            let origin = context
                .env
                .workspace
                .prepare(&job.spec, &context.output_path, job.use_template)
                .await?;
            context.job.log(format!(
                "Workspace prepared from {origin} at {}",
                context.output_path.display()
            ));
        }

        let settings = &context.env.settings;
        let request = GenerationRequest::new(
            &settings.model,
            GENERATION_SYSTEM_PROMPT,
            generation_prompt(&job.spec, context.iteration, &job.errors),
        )
        .with_max_tokens(settings.max_tokens)
        .with_temperature(settings.temperature);

        context
            .job
            .log(format!("Requesting source from {}", provider.name()));
        let response = match provider.generate(&request).await {
            Ok(response) => response,
            Err(error) if error.is_retryable() => {
                return Ok(StageOutcome::failed(format!("Provider error: {error}")));
            }
            Err(error) => return Err(error.into()),
        };

        let files = parse_code_blocks(&response);
        if files.is_empty() {
            return Ok(StageOutcome::failed(
                "Provider response contained no usable source files",
            ));
        }
        match write_files(&context.output_path, &files).await {
            Ok(written) => Ok(StageOutcome::passed(format!(
                "Wrote {written} source file(s)"
            ))),
            Err(error) => Ok(StageOutcome::failed(format!(
                "Could not write generated files: {error}"
            ))),
        }
    }
}
