//! Completion backend trait — the abstraction over remote LLM endpoints.
//!
//! A backend knows how to send one [`PromptSequence`] to a model and get the
//! generated text back. Retries, backoff and circuit breaking are layered on
//! top by the resilient invoker; implementations make exactly one attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::PromptSequence;

/// Model-side knobs for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelParameters {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The completion capability consumed by the response pipeline.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// A human-readable endpoint name (e.g., "openrouter"); also names the circuit.
    fn name(&self) -> &str;

    /// Make a single completion attempt.
    async fn complete(
        &self,
        prompt: &PromptSequence,
        params: &ModelParameters,
    ) -> std::result::Result<String, ProviderError>;

    /// Health check — can we reach the endpoint?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
