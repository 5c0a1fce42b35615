//! Mock provider for testing the pipeline.
//!
//! Responses are matched against the system prompt and user prompt of each
//! request, so generation and validation calls can be scripted separately
//! without real API calls.

use async_trait::async_trait;
use foundry_core::{Error, GenerationProvider, GenerationRequest, IgnoreLock as _, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted reply.
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Failure(String),
}

/// Pattern with its queued replies; the last reply repeats.
#[derive(Debug)]
struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Mock provider that returns pre-defined responses based on prompt patterns.
#[derive(Clone, Default)]
pub struct MockProvider {
    /// Rules in insertion order; first match wins.
    rules: Arc<Mutex<Vec<Rule>>>,
    /// Default response if no rule matches.
    default_response: Arc<Mutex<Option<String>>>,
    /// Call history for verification.
    call_history: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for requests whose system prompt or prompt contains `pattern`.
    #[must_use]
    pub fn with_response(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.push_reply(pattern.into(), Reply::Text(response.into()));
        self
    }

    /// Queue a provider error for requests containing `pattern`.
    #[must_use]
    pub fn with_error(self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.push_reply(pattern.into(), Reply::Failure(message.into()));
        self
    }

    /// Set a default response for requests that don't match any pattern.
    #[must_use]
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        {
            let mut default = self.default_response.lock_ignore_poison();
            *default = Some(response.into());
        }
        self
    }

    /// Get the call history.
    #[must_use]
    pub fn call_history(&self) -> Vec<GenerationRequest> {
        let history = self.call_history.lock_ignore_poison();
        history.clone()
    }

    /// Get the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        let history = self.call_history.lock_ignore_poison();
        history.len()
    }

    fn push_reply(&self, pattern: String, reply: Reply) {
        let mut rules = self.rules.lock_ignore_poison();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.pattern == pattern) {
            rule.replies.push_back(reply);
        } else {
            rules.push(Rule {
                pattern,
                replies: VecDeque::from([reply]),
            });
        }
    }

    fn find_reply(&self, request: &GenerationRequest) -> Option<Reply> {
        let mut rules = self.rules.lock_ignore_poison();
        let rule = rules.iter_mut().find(|rule| {
            request.system.contains(&rule.pattern) || request.prompt.contains(&rule.pattern)
        })?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        {
            let mut history = self.call_history.lock_ignore_poison();
            history.push(request.clone());
        }

        match self.find_reply(request) {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Failure(message)) => Err(Error::Provider(message)),
            None => {
                let default = self.default_response.lock_ignore_poison();
                Ok(default
                    .clone()
                    .unwrap_or_else(|| format!("Mock response for prompt: {}", request.prompt)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(system: &str, prompt: &str) -> GenerationRequest {
        GenerationRequest::new("mock-model", system, prompt)
    }

    #[tokio::test]
    async fn test_matches_system_or_prompt() {
        let provider = MockProvider::new()
            .with_response("reviewer", "{\"score\": 90}")
            .with_response("weather", "```ts src/index.ts\nexport {};\n```");

        let review = provider.generate(&request("You are a reviewer", "check")).await;
        assert!(matches!(review.as_deref(), Ok("{\"score\": 90}")));

        let code = provider.generate(&request("You write code", "a weather tool")).await;
        assert!(matches!(code.as_deref(), Ok(text) if text.starts_with("```ts")));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_queued_replies_then_repeat() {
        let provider = MockProvider::new()
            .with_error("build", "overloaded")
            .with_response("build", "second");

        let first = provider.generate(&request("", "build it")).await;
        assert!(matches!(first, Err(Error::Provider(_))));
        for _ in 0..2 {
            let next = provider.generate(&request("", "build it")).await;
            assert!(matches!(next.as_deref(), Ok("second")));
        }
    }

    #[tokio::test]
    async fn test_default_response() {
        let provider = MockProvider::new().with_default_response("fallback");
        let reply = provider.generate(&request("", "anything")).await;
        assert!(matches!(reply.as_deref(), Ok("fallback")));
        assert_eq!(provider.call_history()[0].prompt, "anything");
    }
}
