use async_trait::async_trait;
use foundry_core::config::ENV_ANTHROPIC_API_KEY;
use foundry_core::{Error, GenerationProvider, GenerationRequest, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Instant;

/// Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    /// HTTP client for API requests.
    client: Client,
    /// Anthropic API key.
    api_key: String,
    /// Base URL, overridable for proxies.
    base_url: String,
}

impl AnthropicProvider {
    /// Creates a new `AnthropicProvider` from the `ANTHROPIC_API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(ENV_ANTHROPIC_API_KEY)
            .map_err(|_| Error::MissingApiKey(ENV_ANTHROPIC_API_KEY.to_owned()))?;
        Self::new(api_key)
    }

    /// Creates a new `AnthropicProvider` with the given API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the provided API key is empty.
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::MissingApiKey(ENV_ANTHROPIC_API_KEY.to_owned()));
        }

        Ok(Self {
            client: Client::default(),
            api_key,
            base_url: ANTHROPIC_API_URL.to_owned(),
        })
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

/// Request payload for the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'req> {
    /// Model identifier.
    model: &'req str,
    /// Completion token limit.
    max_tokens: u32,
    /// Sampling temperature.
    temperature: f32,
    /// System prompt.
    system: &'req str,
    /// Single user turn.
    messages: [Message<'req>; 1],
}

/// One conversation turn.
#[derive(Debug, Serialize)]
struct Message<'req> {
    /// Author role.
    role: &'static str,
    /// Turn text.
    content: &'req str,
}

impl<'req> MessagesRequest<'req> {
    fn from_request(request: &'req GenerationRequest) -> Self {
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
        }
    }
}

/// Response payload.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    /// Content blocks; only `text` blocks are used.
    content: Vec<ContentBlock>,
    /// Why generation stopped.
    #[serde(default)]
    stop_reason: Option<String>,
}

/// One content block.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    /// Block kind.
    #[serde(rename = "type")]
    kind: String,
    /// Text for `text` blocks.
    #[serde(default)]
    text: Option<String>,
}

/// Join the text blocks of a response.
fn extract_text(response: MessagesResponse) -> Result<String> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(Error::InvalidResponse(format!(
            "no text content (stop reason: {})",
            response.stop_reason.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(text)
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let start = Instant::now();
        let payload = MessagesRequest::from_request(request);

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_owned());
            return Err(Error::Provider(format!(
                "Anthropic API error {status}: {error_text}"
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(format!("Failed to parse response: {err}")))?;
        let text = extract_text(body)?;

        tracing::debug!(
            model = %request.model,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "generation finished"
        );
        Ok(text)
    }
}
