//! The response-generation pipeline.
//!
//! A request flows through four stages:
//!
//! 1. **Normalize** the incoming message ([`normalize`])
//! 2. **Build** a token-budgeted prompt from recent history ([`ContextWindowBuilder`])
//! 3. **Invoke** the completion backend with retries and a circuit breaker
//!    ([`banter_providers::ResilientInvoker`])
//! 4. **Normalize** the model's reply before it reaches the chat
//!
//! [`ResponseGenerator`] runs one request end to end; [`ChatSession`] adds
//! history loading and persistence around it.

pub mod context;
pub mod generator;
pub mod normalize;
pub mod session;

pub use context::{ContextWindowBuilder, RatioEstimator, TokenEstimator, shared_estimator};
pub use generator::ResponseGenerator;
pub use normalize::normalize;
pub use session::ChatSession;
