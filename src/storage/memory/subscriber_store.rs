//! In-memory SubscriberStore.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::model::Subscriber;
use crate::storage::{Result, StorageError, SubscriberStore};

#[derive(Default)]
pub struct MemorySubscriberStore {
    subscribers: RwLock<BTreeMap<String, Subscriber>>,
    unavailable: RwLock<bool>,
}

impl MemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StorageError::Unavailable("subscriber store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for MemorySubscriberStore {
    async fn upsert(&self, subscriber: Subscriber) -> Result<()> {
        self.check_available().await?;
        self.subscribers
            .write()
            .await
            .insert(subscriber.player_id.clone(), subscriber);
        Ok(())
    }

    async fn get(&self, player_id: &str) -> Result<Option<Subscriber>> {
        self.check_available().await?;
        Ok(self.subscribers.read().await.get(player_id).cloned())
    }

    async fn set_active(&self, player_id: &str, active: bool) -> Result<bool> {
        self.check_available().await?;
        let mut subscribers = self.subscribers.write().await;
        match subscribers.get_mut(player_id) {
            Some(subscriber) => {
                subscriber.active = active;
                subscriber.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, active_only: bool) -> Result<Vec<Subscriber>> {
        self.check_available().await?;
        Ok(self
            .subscribers
            .read()
            .await
            .values()
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect())
    }
}
