//! SQLite history backend.
//!
//! One table, `entries`, keyed by an autoincrement id so insertion order and
//! id order agree. Timestamps are stored as RFC 3339 text.

use async_trait::async_trait;
use banter_core::error::HistoryError;
use banter_core::history::{ChatId, HistoryStore};
use banter_core::message::{ConversationEntry, Role};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed history store.
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!(path = %path.display(), "SQLite history store initialized");
        Ok(store)
    }

    /// An ephemeral in-process database (useful for tests).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| HistoryError::Storage(format!("Invalid SQLite URL: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open SQLite: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                speaker_id  INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::MigrationFailed(format!("entries table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_chat_id ON entries(chat_id, id DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| HistoryError::MigrationFailed(format!("chat_id index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationEntry, HistoryError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| HistoryError::QueryFailed(format!("id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| HistoryError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| HistoryError::QueryFailed(format!("content column: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| HistoryError::QueryFailed(format!("timestamp column: {e}")))?;
        let speaker_id: i64 = row
            .try_get("speaker_id")
            .map_err(|e| HistoryError::QueryFailed(format!("speaker_id column: {e}")))?;

        let role = Role::from_str(&role)
            .map_err(|e| HistoryError::QueryFailed(format!("entry {id}: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HistoryError::QueryFailed(format!("entry {id} timestamp: {e}")))?;

        Ok(ConversationEntry::new(id, role, content, timestamp, speaker_id))
    }

    /// Insert one entry through `executor` (the pool or an open transaction).
    async fn insert<'e, E>(
        executor: E,
        chat_id: ChatId,
        entry: &ConversationEntry,
    ) -> Result<i64, HistoryError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO entries (chat_id, role, content, timestamp, speaker_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat_id)
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(entry.speaker_id)
        .execute(executor)
        .await
        .map_err(|e| HistoryError::Storage(format!("insert entry: {e}")))?;

        let id = result.last_insert_rowid();
        debug!(chat_id, id, role = %entry.role, "Saved history entry");
        Ok(id)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_recent(
        &self,
        chat_id: ChatId,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<ConversationEntry>, HistoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT id, role, content, timestamp, speaker_id
            FROM entries
            WHERE chat_id = ? AND (? IS NULL OR id < ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HistoryError::QueryFailed(format!("recent entries: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn save(&self, chat_id: ChatId, entry: ConversationEntry) -> Result<i64, HistoryError> {
        Self::insert(&self.pool, chat_id, &entry).await
    }

    async fn save_batch(
        &self,
        chat_id: ChatId,
        entries: Vec<ConversationEntry>,
    ) -> Result<Vec<i64>, HistoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HistoryError::Storage(format!("begin transaction: {e}")))?;

        let mut ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            ids.push(Self::insert(&mut *tx, chat_id, entry).await?);
        }

        tx.commit()
            .await
            .map_err(|e| HistoryError::Storage(format!("commit entries: {e}")))?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_store() -> SqliteHistory {
        SqliteHistory::in_memory().await.unwrap()
    }

    fn entry(role: Role, content: &str, secs: i64) -> ConversationEntry {
        ConversationEntry::new(0, role, content, Utc.timestamp_opt(secs, 0).unwrap(), 42)
    }

    #[tokio::test]
    async fn save_and_read_back() {
        let store = test_store().await;
        let ts = 1_735_689_600;
        let id = store
            .save(1, entry(Role::User, "hello there", ts))
            .await
            .unwrap();
        assert!(id > 0);

        let recent = store.get_recent(1, 10, None).await.unwrap();
        assert_eq!(recent.len(), 1);
        let got = &recent[0];
        assert_eq!(got.id, id);
        assert_eq!(got.role, Role::User);
        assert_eq!(got.content, "hello there");
        assert_eq!(got.timestamp, Utc.timestamp_opt(ts, 0).unwrap());
        assert_eq!(got.speaker_id, 42);
        assert!(got.is_well_formed());
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let store = test_store().await;
        store.save(1, entry(Role::User, "q", 100)).await.unwrap();
        store.save(1, entry(Role::Assistant, "a", 101)).await.unwrap();
        store.save(1, entry(Role::User, "q2", 102)).await.unwrap();

        let recent = store.get_recent(1, 2, None).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(texts, ["q2", "a"]);
    }

    #[tokio::test]
    async fn before_cursor_and_chat_scope() {
        let store = test_store().await;
        let first = store.save(1, entry(Role::User, "a", 100)).await.unwrap();
        store.save(2, entry(Role::User, "other chat", 100)).await.unwrap();
        let third = store.save(1, entry(Role::User, "b", 101)).await.unwrap();

        let page = store.get_recent(1, 10, Some(third)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first);
    }

    #[tokio::test]
    async fn batch_commits_together() {
        let store = test_store().await;
        let ids = store
            .save_batch(
                1,
                vec![entry(Role::User, "q", 100), entry(Role::Assistant, "a", 101)],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);
        assert_eq!(store.get_recent(1, 10, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_batch_stores_nothing() {
        let store = test_store().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_boom BEFORE INSERT ON entries
            WHEN NEW.content = 'boom'
            BEGIN SELECT RAISE(ABORT, 'rejected'); END
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store
            .save_batch(
                1,
                vec![entry(Role::User, "q", 100), entry(Role::Assistant, "boom", 101)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::Storage(_)));
        assert!(store.get_recent(1, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = SqliteHistory::open(&path).await.unwrap();
            store.save(9, entry(Role::User, "remember me", 100)).await.unwrap();
        }
        let store = SqliteHistory::open(&path).await.unwrap();
        let recent = store.get_recent(9, 10, None).await.unwrap();
        assert_eq!(recent[0].content, "remember me");
    }
}
