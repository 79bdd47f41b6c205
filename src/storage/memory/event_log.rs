//! In-memory EventLog.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::model::{Event, NewEvent, Sequence};
use crate::storage::{EventLog, Result, StorageError};

/// Event log held in a vector; index `i` holds sequence `i + 1`.
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<Vec<Event>>,
    unavailable: RwLock<bool>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable("event log offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        self.check_available().await?;
        let mut events = self.events.write().await;
        let id = events.len() as Sequence + 1;
        let event = event.into_event(id, Utc::now());
        events.push(event.clone());
        Ok(event)
    }

    async fn read_page(&self, from: Sequence, until: Sequence, limit: usize) -> Result<Vec<Event>> {
        self.check_available().await?;
        let events = self.events.read().await;
        let start = from.max(1) as usize - 1;
        let end = (until as usize).min(events.len());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(events[start..end].iter().take(limit).cloned().collect())
    }

    async fn get(&self, id: Sequence) -> Result<Option<Event>> {
        self.check_available().await?;
        if id == 0 {
            return Ok(None);
        }
        let events = self.events.read().await;
        Ok(events.get(id as usize - 1).cloned())
    }

    async fn head(&self) -> Result<Sequence> {
        self.check_available().await?;
        Ok(self.events.read().await.len() as Sequence)
    }
}
