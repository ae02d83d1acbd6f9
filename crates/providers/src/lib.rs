//! Completion backends and the resilience layer around them.
//!
//! [`OpenAiCompatProvider`] speaks the OpenAI chat-completions dialect that
//! most hosted and local model servers expose. [`ResilientInvoker`] wraps any
//! backend with retries, backoff, and a shared [`CircuitBreaker`].

pub mod backoff;
pub mod circuit;
pub mod openai_compat;
pub mod resilient;
pub mod router;

pub use backoff::RetryPolicy;
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Permit};
pub use openai_compat::OpenAiCompatProvider;
pub use resilient::ResilientInvoker;
pub use router::build_from_config;
