//! Subscriber storage interface.

use async_trait::async_trait;

use super::Result;
use crate::model::Subscriber;

/// Persistence for the subscriber registry, keyed by player id.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Insert or replace the subscriber with this player id.
    async fn upsert(&self, subscriber: Subscriber) -> Result<()>;

    /// Fetch a subscriber regardless of its active flag.
    async fn get(&self, player_id: &str) -> Result<Option<Subscriber>>;

    /// Flip the active flag. Returns `false` if the player is unknown.
    async fn set_active(&self, player_id: &str, active: bool) -> Result<bool>;

    /// All subscribers ordered by player id, optionally only active ones.
    async fn list(&self, active_only: bool) -> Result<Vec<Subscriber>>;
}
