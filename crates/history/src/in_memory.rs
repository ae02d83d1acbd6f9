//! In-memory history — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use banter_core::error::HistoryError;
use banter_core::history::{ChatId, HistoryStore};
use banter_core::message::ConversationEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Chats {
    next_id: i64,
    by_chat: HashMap<ChatId, Vec<ConversationEntry>>,
}

/// A history store that keeps every chat in a `Vec`, oldest first.
/// Ids are assigned from one counter shared across chats.
#[derive(Clone, Default)]
pub struct InMemoryHistory {
    chats: Arc<RwLock<Chats>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chat with already-persisted entries, keeping their ids.
    pub async fn with_entries(
        self,
        chat_id: ChatId,
        entries: impl IntoIterator<Item = ConversationEntry>,
    ) -> Self {
        {
            let mut chats = self.chats.write().await;
            let mut max_id = chats.next_id;
            let list = chats.by_chat.entry(chat_id).or_default();
            for entry in entries {
                max_id = max_id.max(entry.id);
                list.push(entry);
            }
            list.sort_by_key(|e| e.id);
            chats.next_id = max_id;
        }
        self
    }

    /// Number of entries stored for a chat.
    pub async fn len(&self, chat_id: ChatId) -> usize {
        self.chats
            .read()
            .await
            .by_chat
            .get(&chat_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_recent(
        &self,
        chat_id: ChatId,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<ConversationEntry>, HistoryError> {
        let chats = self.chats.read().await;
        let Some(entries) = chats.by_chat.get(&chat_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .filter(|e| before.is_none_or(|b| e.id < b))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save(&self, chat_id: ChatId, entry: ConversationEntry) -> Result<i64, HistoryError> {
        let mut chats = self.chats.write().await;
        chats.next_id += 1;
        let id = chats.next_id;
        chats
            .by_chat
            .entry(chat_id)
            .or_default()
            .push(entry.with_id(id));
        Ok(id)
    }

    async fn save_batch(
        &self,
        chat_id: ChatId,
        entries: Vec<ConversationEntry>,
    ) -> Result<Vec<i64>, HistoryError> {
        let mut chats = self.chats.write().await;
        let mut ids = Vec::with_capacity(entries.len());
        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            chats.next_id += 1;
            ids.push(chats.next_id);
            stored.push(entry.with_id(chats.next_id));
        }
        chats.by_chat.entry(chat_id).or_default().extend(stored);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_core::message::Role;
    use chrono::{TimeZone, Utc};

    fn entry(id: i64, content: &str) -> ConversationEntry {
        ConversationEntry::new(
            id,
            Role::User,
            content,
            Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            7,
        )
    }

    #[tokio::test]
    async fn save_assigns_increasing_ids() {
        let store = InMemoryHistory::new();
        let a = store.save(1, ConversationEntry::user(7, "a")).await.unwrap();
        let b = store.save(1, ConversationEntry::user(7, "b")).await.unwrap();
        assert!(b > a);
        assert_eq!(store.len(1).await, 2);
    }

    #[tokio::test]
    async fn batch_is_stored_in_order() {
        let store = InMemoryHistory::new();
        let ids = store
            .save_batch(
                1,
                vec![
                    ConversationEntry::user(7, "question"),
                    ConversationEntry::assistant(99, "answer"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids, [1, 2]);

        let recent = store.get_recent(1, 10, None).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(texts, ["answer", "question"]);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let store = InMemoryHistory::new();
        for text in ["one", "two", "three"] {
            store.save(1, ConversationEntry::user(7, text)).await.unwrap();
        }
        let recent = store.get_recent(1, 2, None).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(texts, ["three", "two"]);
    }

    #[tokio::test]
    async fn before_cursor_pages_backwards() {
        let store = InMemoryHistory::new()
            .with_entries(1, (1..=5).map(|i| entry(i, &format!("m{i}"))))
            .await;
        let page = store.get_recent(1, 10, Some(3)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|e| e.id).collect();
        assert_eq!(ids, [2, 1]);
    }

    #[tokio::test]
    async fn chats_are_isolated() {
        let store = InMemoryHistory::new();
        store.save(1, ConversationEntry::user(7, "here")).await.unwrap();
        assert!(store.get_recent(2, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeded_ids_do_not_collide_with_new_ones() {
        let store = InMemoryHistory::new()
            .with_entries(1, vec![entry(10, "old")])
            .await;
        let id = store.save(1, ConversationEntry::user(7, "new")).await.unwrap();
        assert_eq!(id, 11);
    }
}
