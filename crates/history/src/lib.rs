//! Conversation history stores.
//!
//! All stores implement [`banter_core::HistoryStore`]. [`open`] picks one from
//! configuration.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use banter_config::{HistoryBackend, HistoryConfig};
use banter_core::HistoryStore;
use banter_core::error::HistoryError;

pub use in_memory::InMemoryHistory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;

/// Open the store selected by `config`.
pub async fn open(config: &HistoryConfig) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    match config.backend {
        HistoryBackend::Memory => Ok(Arc::new(InMemoryHistory::new())),
        #[cfg(feature = "sqlite")]
        HistoryBackend::Sqlite => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    HistoryError::Storage(format!("create {}: {e}", parent.display()))
                })?;
            }
            let store = SqliteHistory::open(&path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        HistoryBackend::Sqlite => Err(HistoryError::Storage(
            "built without the `sqlite` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_memory_store() {
        let config = HistoryConfig {
            backend: HistoryBackend::Memory,
            path: None,
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "in_memory");
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn opens_sqlite_store_creating_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let config = HistoryConfig {
            backend: HistoryBackend::Sqlite,
            path: Some(path.clone()),
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(path.exists());
    }
}
