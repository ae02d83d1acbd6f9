//! OpenAI-compatible completion backend.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! and any endpoint exposing `/v1/chat/completions`.
//!
//! One call to [`CompletionBackend::complete`] is one HTTP request; retries
//! and circuit breaking belong to [`crate::ResilientInvoker`]. HTTP failures
//! are mapped onto [`ProviderError`] variants precise enough for
//! [`ProviderError::classify`] to separate permanent from transient.

use async_trait::async_trait;
use banter_core::error::ProviderError;
use banter_core::message::{ConversationEntry, PromptSequence, Role};
use banter_core::provider::{CompletionBackend, ModelParameters};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible completion endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    frame_entries: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            frame_entries: true,
            client,
        }
    }

    /// Toggle `[timestamp] role:speaker: ` framing of chat turns.
    pub fn with_framing(mut self, frame_entries: bool) -> Self {
        self.frame_entries = frame_entries;
        self
    }

    /// Convert a prompt sequence to OpenAI API format.
    fn to_api_messages(prompt: &PromptSequence, frame_entries: bool) -> Vec<ApiMessage> {
        prompt
            .iter()
            .map(|entry| ApiMessage {
                role: entry.role.as_str().to_string(),
                content: Some(Self::render_content(entry, frame_entries)),
            })
            .collect()
    }

    /// Chat turns carry who spoke and when, so the model can follow a group thread.
    fn render_content(entry: &ConversationEntry, frame_entries: bool) -> String {
        if !frame_entries || entry.role == Role::System {
            return entry.content.clone();
        }
        format!(
            "[{}] {}: {}",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            entry.speaker_tag(),
            entry.content
        )
    }

    fn map_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status and body onto a provider error.
    fn map_status(
        status: u16,
        body: String,
        retry_after: Option<u64>,
        model: &str,
    ) -> ProviderError {
        let lower = body.to_lowercase();
        match status {
            429 if !lower.contains("insufficient_quota") => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            404 => ProviderError::ModelNotFound(model.to_string()),
            413 => ProviderError::InvalidRequest(format!("request too large: {body}")),
            400 | 422 if lower.contains("content_policy") || lower.contains("content_filter") => {
                ProviderError::ContentRejected(body)
            }
            400 | 422 => ProviderError::InvalidRequest(body),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &PromptSequence,
        params: &ModelParameters,
    ) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": params.model,
            "messages": Self::to_api_messages(prompt, self.frame_entries),
            "temperature": params.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(
            provider = %self.name,
            model = %params.model,
            turns = prompt.len(),
            estimated_tokens = prompt.estimated_tokens(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(Self::map_status(
                status,
                error_body,
                retry_after,
                &params.model,
            ));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

        if let Some(usage) = &api_response.usage {
            debug!(
                model = %api_response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Completion usage"
            );
        }

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_core::error::FailureClass;
    use chrono::{TimeZone, Utc};

    fn sample_prompt() -> PromptSequence {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        PromptSequence::from_parts(
            vec![
                ConversationEntry::system("You are helpful", ts),
                ConversationEntry::new(1, Role::User, "anyone up?", ts, 42),
                ConversationEntry::new(2, Role::Assistant, "me!", ts, 7),
                ConversationEntry::new(0, Role::User, "Hello", ts, 42),
            ],
            60,
            1000,
            2,
            0,
        )
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("x", "http://localhost:8000/v1/", "k");
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion_frames_chat_turns() {
        let api_messages = OpenAiCompatProvider::to_api_messages(&sample_prompt(), true);
        assert_eq!(api_messages.len(), 4);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[0].content.as_deref(), Some("You are helpful"));
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(
            api_messages[1].content.as_deref(),
            Some("[2025-01-01T12:00:00Z] user:42: anyone up?")
        );
        assert_eq!(api_messages[2].role, "assistant");
        assert_eq!(
            api_messages[2].content.as_deref(),
            Some("[2025-01-01T12:00:00Z] assistant:7: me!")
        );
    }

    #[test]
    fn message_conversion_without_framing() {
        let api_messages = OpenAiCompatProvider::to_api_messages(&sample_prompt(), false);
        assert_eq!(api_messages[3].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn status_mapping_is_classifiable() {
        let cases = [
            (401, "", FailureClass::Permanent),
            (404, "", FailureClass::Permanent),
            (413, "", FailureClass::Permanent),
            (400, r#"{"error":{"code":"content_policy_violation"}}"#, FailureClass::Permanent),
            (422, "bad field", FailureClass::Permanent),
            (429, "slow down", FailureClass::Transient),
            (429, r#"{"error":{"code":"insufficient_quota"}}"#, FailureClass::Permanent),
            (500, "oops", FailureClass::Transient),
            (503, "overloaded", FailureClass::Transient),
        ];
        for (status, body, expected) in cases {
            let err = OpenAiCompatProvider::map_status(status, body.into(), None, "m");
            assert_eq!(err.classify(), expected, "status {status} body {body}");
        }
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let err = OpenAiCompatProvider::map_status(429, String::new(), Some(12), "m");
        assert!(matches!(
            err,
            ProviderError::RateLimited {
                retry_after_secs: 12
            }
        ));
    }

    #[test]
    fn content_filter_maps_to_rejection() {
        let err = OpenAiCompatProvider::map_status(
            400,
            r#"{"error":{"code":"content_filter"}}"#.into(),
            None,
            "m",
        );
        assert!(matches!(err, ProviderError::ContentRejected(_)));
    }

    #[test]
    fn parse_api_response() {
        let raw = r#"{
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "hi!"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi!"));
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        // Port 9 (discard) on localhost is closed on CI machines.
        let provider = OpenAiCompatProvider::new("dead", "http://127.0.0.1:9/v1", "k");
        let err = provider
            .complete(&sample_prompt(), &ModelParameters::new("m"))
            .await
            .unwrap_err();
        assert_eq!(err.classify(), FailureClass::Transient);
    }
}
