//! Storage implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};

pub use crate::interfaces::{
    read_from, AckStore, EventLog, Expected, Result, StorageError, SubscriberStore, UpsertOutcome,
    WatermarkStore,
};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{MemoryAckStore, MemoryEventLog, MemorySubscriberStore, MemoryWatermarkStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAckStore, SqliteEventLog, SqliteSubscriberStore, SqliteWatermarkStore};

/// The four tables the notifier persists, each owned by one component.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventLog>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pub tasks: Arc<dyn AckStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
}

impl Stores {
    /// Fresh, empty in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(MemoryEventLog::new()),
            subscribers: Arc::new(MemorySubscriberStore::new()),
            tasks: Arc::new(MemoryAckStore::new()),
            watermarks: Arc::new(MemoryWatermarkStore::new()),
        }
    }

    /// SQLite stores sharing one pool. Creates tables if missing.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(pool: sqlx::SqlitePool) -> Result<Self> {
        schema::create_tables(&pool).await?;
        Ok(Self {
            events: Arc::new(SqliteEventLog::new(pool.clone())),
            subscribers: Arc::new(SqliteSubscriberStore::new(pool.clone())),
            tasks: Arc::new(SqliteAckStore::new(pool.clone())),
            watermarks: Arc::new(SqliteWatermarkStore::new(pool)),
        })
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory (state is lost on restart)");
            Ok(Stores::in_memory())
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            use backon::Retryable;

            info!("Storage: sqlite at {}", config.path);

            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
            }

            let url = format!("sqlite:{}?mode=rwc", config.path);
            let pool = (|| sqlx::SqlitePool::connect(&url))
                .retry(crate::utils::retry::connection_backoff())
                .notify(|e, delay| {
                    tracing::warn!(error = %e, ?delay, "SQLite connect failed, retrying");
                })
                .await?;

            Stores::sqlite(pool).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Unavailable(
                "sqlite feature not enabled".to_string(),
            ))
        }
    }
}
