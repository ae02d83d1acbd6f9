//! Resilient completion invoker.
//!
//! Wraps a [`CompletionBackend`] with bounded retries, exponential backoff,
//! and a shared [`CircuitBreaker`]. Every suspension point (the backend call
//! and the backoff sleep) races the caller's [`CallContext`], so a cancel or
//! deadline ends the invocation promptly.

use std::sync::Arc;
use std::time::Duration;

use banter_config::ResilienceConfig;
use banter_core::call::CallContext;
use banter_core::error::{Error, InvokeError, ProviderError};
use banter_core::message::PromptSequence;
use banter_core::provider::{CompletionBackend, ModelParameters};
use tracing::{debug, warn};

use crate::backoff::{RetryPolicy, RetryState};
use crate::circuit::{CircuitBreaker, CircuitBreakerConfig};

pub struct ResilientInvoker {
    backend: Arc<dyn CompletionBackend>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    /// Build an invoker around an existing breaker, which may be shared with
    /// other invokers that target the same endpoint.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Result<Self, Error> {
        policy
            .validate()
            .map_err(|message| Error::Config { message })?;
        Ok(Self {
            backend,
            breaker,
            policy,
        })
    }

    /// Build an invoker with its own breaker named after the backend.
    pub fn from_config(
        backend: Arc<dyn CompletionBackend>,
        config: &ResilienceConfig,
    ) -> Result<Self, Error> {
        let breaker = Arc::new(CircuitBreaker::new(
            backend.name(),
            CircuitBreakerConfig::from_config(config),
        ));
        Self::new(backend, breaker, RetryPolicy::from_config(config))
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `prompt` to the backend, retrying transient failures.
    ///
    /// Returns the raw completion text. Permanent failures are returned after
    /// one attempt; transient ones after `max_attempts`. When the breaker is
    /// open the backend is not called at all.
    pub async fn invoke(
        &self,
        prompt: &PromptSequence,
        params: &ModelParameters,
        ctx: &CallContext,
    ) -> Result<String, InvokeError> {
        let mut state = RetryState::new(&self.policy);

        loop {
            if ctx.is_done() {
                return Err(InvokeError::Cancelled);
            }
            let permit = self.breaker.try_acquire()?;
            state.attempt += 1;

            debug!(
                backend = self.backend.name(),
                attempt = state.attempt,
                max_attempts = self.policy.max_attempts,
                prompt_entries = prompt.len(),
                "Invoking completion backend"
            );

            let outcome = tokio::select! {
                biased;
                _ = ctx.done() => None,
                result = self.attempt(prompt, params, ctx) => Some(result),
            };

            let error = match outcome {
                None => {
                    self.breaker.release(permit);
                    return Err(InvokeError::Cancelled);
                }
                Some(Ok(text)) => {
                    self.breaker.record_success(permit);
                    return Ok(text);
                }
                Some(Err(error)) => error,
            };

            self.breaker.record_failure(permit);

            if error.is_permanent() {
                warn!(
                    backend = self.backend.name(),
                    attempt = state.attempt,
                    error = %error,
                    "Permanent backend failure, not retrying"
                );
                return Err(InvokeError::Permanent(error));
            }

            if !state.has_attempts_left(&self.policy) {
                warn!(
                    backend = self.backend.name(),
                    attempts = state.attempt,
                    error = %error,
                    "Backend retries exhausted"
                );
                return Err(InvokeError::Exhausted {
                    attempts: state.attempt,
                    last: error,
                });
            }

            let retry_after = match &error {
                ProviderError::RateLimited { retry_after_secs } => {
                    Some(Duration::from_secs(*retry_after_secs))
                }
                _ => None,
            };
            let mut delay = state.record_failure(&self.policy, error);
            if let Some(hint) = retry_after {
                delay = delay.max(hint).min(self.policy.max_backoff);
            }

            warn!(
                backend = self.backend.name(),
                attempt = state.attempt,
                backoff_ms = delay.as_millis() as u64,
                error = ?state.last_error,
                "Transient backend failure, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.done() => return Err(InvokeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One backend call. A caller deadline bounds it through `ctx.done()`;
    /// without one, `attempt_timeout` does.
    async fn attempt(
        &self,
        prompt: &PromptSequence,
        params: &ModelParameters,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        if ctx.deadline().is_some() {
            return self.backend.complete(prompt, params).await;
        }
        let timeout = self.policy.attempt_timeout;
        match tokio::time::timeout(timeout, self.backend.complete(prompt, params)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}
