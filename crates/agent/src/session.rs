//! Chat session — history in, reply out, exchange persisted.
//!
//! A session is the caller of [`ResponseGenerator`]: it loads the recent
//! turns of a chat, asks for a reply, and appends the user's message and the
//! reply to the store as one batch, so a chat never keeps a question without
//! its answer. Store failures surface as [`Error::Dependency`] and are never
//! retried. Both store calls race the caller's [`CallContext`].

use std::sync::Arc;

use banter_config::AppConfig;
use banter_core::call::CallContext;
use banter_core::error::{Error, Result};
use banter_core::history::{ChatId, HistoryStore};
use banter_core::message::{ConversationEntry, Role};
use chrono::Utc;
use tracing::debug;

use crate::generator::ResponseGenerator;
use crate::normalize::normalize;

pub struct ChatSession {
    generator: Arc<ResponseGenerator>,
    store: Arc<dyn HistoryStore>,
    system_prompt: String,
    budget: usize,
    history_limit: usize,
    bot_id: i64,
}

impl ChatSession {
    pub fn new(
        generator: Arc<ResponseGenerator>,
        store: Arc<dyn HistoryStore>,
        system_prompt: impl Into<String>,
        bot_id: i64,
    ) -> Self {
        Self {
            generator,
            store,
            system_prompt: system_prompt.into(),
            budget: 3000,
            history_limit: 50,
            bot_id,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        generator: Arc<ResponseGenerator>,
        store: Arc<dyn HistoryStore>,
        bot_id: i64,
    ) -> Self {
        Self::new(generator, store, config.system_prompt.clone(), bot_id)
            .with_budget(config.context.budget)
            .with_history_limit(config.context.history_limit)
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn generator(&self) -> &Arc<ResponseGenerator> {
        &self.generator
    }

    /// Reply to `text` from `user_id` in `chat_id`, then record the exchange.
    pub async fn respond(
        &self,
        chat_id: ChatId,
        user_id: i64,
        text: &str,
        ctx: &CallContext,
    ) -> Result<String> {
        let history = tokio::select! {
            biased;
            _ = ctx.done() => return Err(Error::Cancelled),
            loaded = self.store.get_recent(chat_id, self.history_limit, None) => loaded?,
        };
        debug!(chat_id, loaded = history.len(), "Loaded chat history");

        let received_at = Utc::now();
        let reply = self
            .generator
            .generate(user_id, text, &history, &self.system_prompt, self.budget, ctx)
            .await?;

        // `generate` succeeded, so the input normalizes.
        let message = normalize(text).map_err(Error::InvalidInput)?;
        let exchange = vec![
            ConversationEntry::new(0, Role::User, message, received_at, user_id),
            ConversationEntry::new(0, Role::Assistant, reply.clone(), Utc::now(), self.bot_id),
        ];
        tokio::select! {
            biased;
            _ = ctx.done() => return Err(Error::Cancelled),
            saved = self.store.save_batch(chat_id, exchange) => {
                saved?;
            }
        }

        Ok(reply)
    }
}
