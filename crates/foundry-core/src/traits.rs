use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A single-turn request to a generation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// System prompt framing the task.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl GenerationRequest {
    /// Build a request with the default limits.
    pub fn new<S: Into<String>, P: Into<String>>(model: &str, system: S, prompt: P) -> Self {
        Self {
            model: model.to_owned(),
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 8192,
            temperature: 0.2,
        }
    }

    /// Override the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Trait for external services that turn prompts into source text.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the unique identifier for this provider.
    fn name(&self) -> &'static str;

    /// Generates free text for the given request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable, rejects the request,
    /// or returns a response without text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
