//! Response generator — the orchestrator of one generation request.
//!
//! 1. Normalize the incoming text (fail fast when nothing is left)
//! 2. Normalize history turns, dropping the ones that come out empty
//! 3. Build the budgeted prompt
//! 4. Invoke the backend through the resilient invoker
//! 5. Normalize the reply (a reply that is only metadata is a failure)
//!
//! The generator never touches the history store; see [`crate::ChatSession`].

use std::sync::Arc;

use banter_config::AppConfig;
use banter_core::call::CallContext;
use banter_core::error::{Error, Result};
use banter_core::message::{ConversationEntry, Role};
use banter_core::provider::{CompletionBackend, ModelParameters};
use banter_providers::ResilientInvoker;
use chrono::Utc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::{ContextWindowBuilder, shared_estimator};
use crate::normalize::normalize;

pub struct ResponseGenerator {
    builder: ContextWindowBuilder,
    invoker: Arc<ResilientInvoker>,
    params: ModelParameters,
}

impl ResponseGenerator {
    pub fn new(
        builder: ContextWindowBuilder,
        invoker: Arc<ResilientInvoker>,
        params: ModelParameters,
    ) -> Self {
        Self {
            builder,
            invoker,
            params,
        }
    }

    /// Wire a generator for `backend` from configuration.
    pub fn from_config(config: &AppConfig, backend: Arc<dyn CompletionBackend>) -> Result<Self> {
        let invoker = ResilientInvoker::from_config(backend, &config.resilience)?;
        let builder =
            ContextWindowBuilder::from_config(shared_estimator(&config.context), &config.context);
        let params = ModelParameters::new(config.effective_model())
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens);
        Ok(Self::new(builder, Arc::new(invoker), params))
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// Produce a reply to `text` from `user_id`.
    ///
    /// `history` may be newest-first or oldest-first. Every wait inside the
    /// call observes `ctx`.
    pub async fn generate(
        &self,
        user_id: i64,
        text: &str,
        history: &[ConversationEntry],
        system_prompt: &str,
        budget: usize,
        ctx: &CallContext,
    ) -> Result<String> {
        let span = info_span!("generate", user_id);
        async move {
            let result = self
                .run(user_id, text, history, system_prompt, budget, ctx)
                .await;
            match &result {
                Ok(reply) => info!(reply_chars = reply.chars().count(), "Reply generated"),
                Err(e) => warn!(kind = %e.kind(), error = %e, "Generation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        user_id: i64,
        text: &str,
        history: &[ConversationEntry],
        system_prompt: &str,
        budget: usize,
        ctx: &CallContext,
    ) -> Result<String> {
        let message = normalize(text).map_err(Error::InvalidInput)?;
        let current = ConversationEntry::new(0, Role::User, message, Utc::now(), user_id);

        let cleaned: Vec<ConversationEntry> = history
            .iter()
            .filter_map(|entry| {
                normalize(&entry.content)
                    .ok()
                    .map(|content| entry.clone().with_content(content))
            })
            .collect();
        if cleaned.len() < history.len() {
            debug!(
                dropped = history.len() - cleaned.len(),
                "History entries empty after normalization"
            );
        }

        let prompt = self.builder.build(&cleaned, system_prompt, current, budget);
        if prompt.is_over_budget() {
            warn!(
                tokens = prompt.estimated_tokens(),
                budget,
                "System prompt and message exceed the budget, sending without history"
            );
        }

        let raw = self.invoker.invoke(&prompt, &self.params, ctx).await?;
        normalize(&raw).map_err(Error::InvalidOutput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RatioEstimator;
    use async_trait::async_trait;
    use banter_core::error::{ErrorKind, ProviderError, ValidationError};
    use banter_core::message::PromptSequence;
    use banter_providers::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns a fixed reply and records every prompt it sees.
    struct EchoBackend {
        reply: std::result::Result<String, ProviderError>,
        prompts: Mutex<Vec<PromptSequence>>,
    }

    impl EchoBackend {
        fn new(reply: std::result::Result<String, ProviderError>) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            prompt: &PromptSequence,
            _params: &ModelParameters,
        ) -> std::result::Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.reply.clone()
        }
    }

    fn generator(backend: Arc<EchoBackend>) -> ResponseGenerator {
        let breaker = Arc::new(CircuitBreaker::new("echo", CircuitBreakerConfig::default()));
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter(0.0);
        let invoker = ResilientInvoker::new(backend, breaker, policy).unwrap();
        ResponseGenerator::new(
            ContextWindowBuilder::new(Arc::new(RatioEstimator::default())),
            Arc::new(invoker),
            ModelParameters::new("test-model"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn normalizes_input_and_output() {
        let backend = Arc::new(EchoBackend::new(Ok("[2025-01-01T00:00:00Z] BOT: hi!".into())));
        let generator = generator(backend.clone());
        let reply = generator
            .generate(7, "  hello\tbot  ", &[], "be brief", 1000, &CallContext::new())
            .await
            .unwrap();
        assert_eq!(reply, "hi!");

        let prompts = backend.prompts.lock().unwrap();
        let sent = &prompts[0];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.system().unwrap().content, "be brief");
        let current = sent.current().unwrap();
        assert_eq!(current.content, "hello bot");
        assert_eq!(current.speaker_id, 7);
    }

    #[tokio::test]
    async fn selected_provider_model_is_used() {
        let mut config = AppConfig::default();
        config.providers.insert(
            config.default_provider.clone(),
            banter_config::ProviderConfig {
                default_model: Some("openai/gpt-4o-mini".into()),
                ..Default::default()
            },
        );
        let backend = Arc::new(EchoBackend::new(Ok("ok".into())));
        let generator = ResponseGenerator::from_config(&config, backend).unwrap();
        assert_eq!(generator.params().model, "openai/gpt-4o-mini");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_fails_without_calling_backend() {
        let backend = Arc::new(EchoBackend::new(Ok("unused".into())));
        let generator = generator(backend.clone());
        let err = generator
            .generate(7, " \t ", &[], "sys", 1000, &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ValidationError::EmptyResult)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_only_reply_is_invalid_output() {
        let backend = Arc::new(EchoBackend::new(Ok("[2025-01-01T00:00:00Z] BOT: ".into())));
        let err = generator(backend)
            .generate(7, "hi", &[], "sys", 1000, &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOutput(ValidationError::EmptyResult)));
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_normalized_and_blank_turns_dropped() {
        let backend = Arc::new(EchoBackend::new(Ok("ok".into())));
        let generator = generator(backend.clone());
        let ts = Utc::now() - chrono::Duration::minutes(5);
        let history = vec![
            ConversationEntry::new(2, Role::Assistant, "[2025-01-01T00:00:00Z] BOT: sure", ts, 99),
            ConversationEntry::new(1, Role::User, "\u{200B}\u{FEFF}", ts, 7),
        ];
        generator
            .generate(7, "next", &history, "sys", 1000, &CallContext::new())
            .await
            .unwrap();

        let prompts = backend.prompts.lock().unwrap();
        let turns: Vec<_> = prompts[0].history().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(turns, ["sure"]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_backend_error_is_tagged() {
        let backend = Arc::new(EchoBackend::new(Err(ProviderError::AuthenticationFailed(
            "bad key".into(),
        ))));
        let err = generator(backend)
            .generate(7, "hi", &[], "sys", 1000, &CallContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermanentBackend);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_carry_attempts() {
        let backend = Arc::new(EchoBackend::new(Err(ProviderError::Network("down".into()))));
        let err = generator(backend.clone())
            .generate(7, "hi", &[], "sys", 1000, &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientBackend { attempts: 2, .. }));
        assert_eq!(backend.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_context_is_reported() {
        let backend = Arc::new(EchoBackend::new(Ok("unused".into())));
        let ctx = CallContext::new();
        ctx.cancel();
        let err = generator(backend)
            .generate(7, "hi", &[], "sys", 1000, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
