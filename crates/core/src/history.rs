//! History store trait — where past chat turns come from and go to.
//!
//! The response pipeline only reads recent turns and appends new ones, so the
//! capability is deliberately narrow. Stores make no retries of their own.

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::message::ConversationEntry;

/// Chat (group) identifier on the transport platform.
pub type ChatId = i64;

/// Persistent conversation history, scoped per chat.
///
/// Implementations: SQLite, in-memory (for testing).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Up to `limit` most recent entries of a chat, newest first.
    ///
    /// With `before = Some(id)` only entries with a smaller id are returned,
    /// which pages backwards through the chat.
    async fn get_recent(
        &self,
        chat_id: ChatId,
        limit: usize,
        before: Option<i64>,
    ) -> std::result::Result<Vec<ConversationEntry>, HistoryError>;

    /// Append an entry, returning its assigned id.
    async fn save(
        &self,
        chat_id: ChatId,
        entry: ConversationEntry,
    ) -> std::result::Result<i64, HistoryError>;

    /// Append several entries as one unit, returning their ids in order.
    ///
    /// Stores with transactions store all of them or none. The default
    /// saves one at a time and may leave a prefix behind on failure.
    async fn save_batch(
        &self,
        chat_id: ChatId,
        entries: Vec<ConversationEntry>,
    ) -> std::result::Result<Vec<i64>, HistoryError> {
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(self.save(chat_id, entry).await?);
        }
        Ok(ids)
    }
}
