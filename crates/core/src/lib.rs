//! # banter core
//!
//! Domain types, capability traits, and error definitions for the banter
//! group-chat assistant. This crate does **no I/O** — it defines the model
//! that the provider, history and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Each external collaborator is a narrow trait here:
//! - [`CompletionBackend`] — one `complete` call to a remote model
//! - [`HistoryStore`] — `get_recent` and `save` for chat turns
//!
//! so tests swap in independent fakes and all crates depend inward on core.

pub mod call;
pub mod error;
pub mod history;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use call::CallContext;
pub use error::{
    Error, ErrorKind, FailureClass, HistoryError, InvokeError, ProviderError, Result,
    ValidationError,
};
pub use history::{ChatId, HistoryStore};
pub use message::{ConversationEntry, PromptSequence, Role, WindowUnit};
pub use provider::{CompletionBackend, ModelParameters};
