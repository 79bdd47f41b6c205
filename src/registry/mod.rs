//! Subscriber registry.
//!
//! Validates registrations and answers "who wants this event?". Filters are
//! evaluated in-process against a fresh read of the active subscribers, so
//! a re-run of dispatch for the same event sees the same answer unless the
//! registry itself changed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::model::{Event, Subscriber, SubscriberFilter};
use crate::storage::{StorageError, SubscriberStore};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid subscriber: {reason}")]
    SubscriberInvalid { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegistryError {
    fn invalid(reason: impl Into<String>) -> Self {
        RegistryError::SubscriberInvalid {
            reason: reason.into(),
        }
    }
}

/// Check a registration before it can enter the pipeline.
pub fn validate_registration(
    player_id: &str,
    filter: &SubscriberFilter,
    endpoint: &str,
) -> Result<()> {
    if player_id.is_empty() {
        return Err(RegistryError::invalid("playerId must not be empty"));
    }
    if player_id.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(RegistryError::invalid(
            "playerId must not contain whitespace or '/'",
        ));
    }

    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| RegistryError::invalid(format!("endpoint {:?}: {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(RegistryError::invalid(format!(
            "endpoint {:?} must be an absolute http(s) URL",
            endpoint
        )));
    }

    filter.validate().map_err(RegistryError::invalid)
}

/// Registry of players interested in prototype events.
#[derive(Clone)]
pub struct SubscriberRegistry {
    store: Arc<dyn SubscriberStore>,
}

impl SubscriberRegistry {
    pub fn new(store: Arc<dyn SubscriberStore>) -> Self {
        Self { store }
    }

    /// Register or re-register a player.
    ///
    /// Idempotent: re-registering replaces filter and endpoint and
    /// reactivates a deactivated subscriber. The original registration time
    /// is kept.
    pub async fn register(
        &self,
        player_id: &str,
        filter: SubscriberFilter,
        endpoint: &str,
    ) -> Result<Subscriber> {
        validate_registration(player_id, &filter, endpoint)?;

        let subscriber = match self.store.get(player_id).await? {
            Some(existing) => Subscriber {
                filter,
                endpoint: endpoint.to_string(),
                active: true,
                updated_at: Utc::now(),
                ..existing
            },
            None => Subscriber::new(player_id, filter, endpoint),
        };

        self.store.upsert(subscriber.clone()).await?;
        info!(player_id = %player_id, endpoint = %endpoint, "Subscriber registered");
        Ok(subscriber)
    }

    /// Soft-delete a subscriber. Returns `false` if the player is unknown.
    ///
    /// Tasks already created for the player keep running; no new tasks are
    /// created for it.
    pub async fn deactivate(&self, player_id: &str) -> Result<bool> {
        let found = self.store.set_active(player_id, false).await?;
        if found {
            info!(player_id = %player_id, "Subscriber deactivated");
        } else {
            debug!(player_id = %player_id, "Deactivate for unknown subscriber");
        }
        Ok(found)
    }

    /// Active subscribers whose filter accepts `event`, ordered by player id.
    pub async fn matches(&self, event: &Event) -> Result<Vec<Subscriber>> {
        let active = self.store.list(true).await?;
        Ok(active.into_iter().filter(|s| s.wants(event)).collect())
    }

    pub async fn get(&self, player_id: &str) -> Result<Option<Subscriber>> {
        Ok(self.store.get(player_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Subscriber>> {
        Ok(self.store.list(false).await?)
    }
}
