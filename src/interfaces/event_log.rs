//! Event log interface.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::model::{Event, NewEvent, Sequence};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            #[cfg(feature = "sqlite")]
            StorageError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StorageError::Serialization(_) | StorageError::Corrupt(_) => false,
        }
    }
}

/// Append-only, totally ordered record of submitted events.
///
/// Implementations:
/// - `MemoryEventLog`: in-process, for tests and ephemeral deployments
/// - `SqliteEventLog`: SQLite table keyed by sequence number
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event, assigning the next sequence number.
    ///
    /// Linearizable: concurrent appends receive distinct, gap-free,
    /// strictly increasing sequence numbers.
    async fn append(&self, event: NewEvent) -> Result<Event>;

    /// Events with `from <= id <= until`, ascending, at most `limit`.
    async fn read_page(&self, from: Sequence, until: Sequence, limit: usize) -> Result<Vec<Event>>;

    /// Fetch a single event.
    async fn get(&self, id: Sequence) -> Result<Option<Event>>;

    /// Highest assigned sequence number, `0` when empty.
    async fn head(&self) -> Result<Sequence>;
}

/// Lazily stream events with `id >= from` in ascending order.
///
/// The stream is bounded by the log head observed on first poll, so it is
/// finite even while appends continue. Restart from any sequence number by
/// calling again. A storage error ends the stream after being yielded.
pub fn read_from(
    log: &dyn EventLog,
    from: Sequence,
    page_size: usize,
) -> BoxStream<'_, Result<Event>> {
    struct Cursor {
        next: Sequence,
        head: Option<Sequence>,
        buffered: VecDeque<Event>,
        done: bool,
    }

    let page_size = page_size.max(1);
    let cursor = Cursor {
        next: from.max(1),
        head: None,
        buffered: VecDeque::new(),
        done: false,
    };

    stream::unfold(cursor, move |mut cursor| async move {
        if cursor.done {
            return None;
        }
        if let Some(event) = cursor.buffered.pop_front() {
            return Some((Ok(event), cursor));
        }

        let head = match cursor.head {
            Some(head) => head,
            None => match log.head().await {
                Ok(head) => {
                    cursor.head = Some(head);
                    head
                }
                Err(e) => {
                    cursor.done = true;
                    return Some((Err(e), cursor));
                }
            },
        };
        if cursor.next > head {
            return None;
        }

        match log.read_page(cursor.next, head, page_size).await {
            Ok(page) => {
                let last = page.last()?.id;
                cursor.next = last + 1;
                cursor.buffered = page.into();
                let event = cursor.buffered.pop_front()?;
                Some((Ok(event), cursor))
            }
            Err(e) => {
                cursor.done = true;
                Some((Err(e), cursor))
            }
        }
    })
    .boxed()
}
