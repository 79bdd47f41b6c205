//! Dead-letter publishing.
//!
//! When a delivery task is abandoned, a [`DeadLetter`] record is handed to a
//! [`DeadLetterPublisher`] for out-of-band handling (alerting, replay
//! tooling). The ack tracker remains the source of truth for the operator
//! dead-letter view; a failed publish never changes task state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::DlqConfig;
use crate::model::{DeliveryTask, Sequence};

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// Why a task ended up abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonCause {
    RetriesExhausted,
    OperatorCancel,
    /// Event or subscriber missing for an existing task.
    Inconsistent,
}

/// Dead-letter record for an abandoned delivery task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub event_id: Sequence,
    pub player_id: String,
    pub delivery_id: Uuid,
    /// Absent when the event could not be loaded.
    pub game_id: Option<String>,
    pub attempts: u32,
    pub cause: AbandonCause,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl DeadLetter {
    pub fn new(task: &DeliveryTask, cause: AbandonCause, reason: impl Into<String>) -> Self {
        Self {
            event_id: task.event_id,
            player_id: task.player_id.clone(),
            delivery_id: task.delivery_id(),
            game_id: None,
            attempts: task.attempt,
            cause,
            reason: reason.into(),
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_game_id(mut self, game_id: impl Into<String>) -> Self {
        self.game_id = Some(game_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Trait for publishing abandoned tasks.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;

    /// Check if the publisher forwards records anywhere.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Publisher used when dead-letter publishing is disabled.
pub struct NoopDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for NoopDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        debug!(
            event_id = dead_letter.event_id,
            player_id = %dead_letter.player_id,
            "DLQ disabled, dropping dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Emits each dead letter as a structured log record.
///
/// Default for a standalone process: the record lands wherever the
/// tracing subscriber ships logs.
pub struct LogDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for LogDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        let record = serde_json::to_string(&dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))?;
        error!(
            event_id = dead_letter.event_id,
            player_id = %dead_letter.player_id,
            cause = ?dead_letter.cause,
            dead_letter = %record,
            "Delivery abandoned"
        );
        Ok(())
    }
}

/// In-process publisher using a channel.
///
/// Used for embedding and testing.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        info!(
            event_id = dead_letter.event_id,
            player_id = %dead_letter.player_id,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// Create a DLQ publisher based on configuration.
pub fn create_publisher(config: &DlqConfig) -> Arc<dyn DeadLetterPublisher> {
    if config.enabled {
        Arc::new(LogDeadLetterPublisher)
    } else {
        debug!("DLQ disabled, using noop publisher");
        Arc::new(NoopDeadLetterPublisher)
    }
}
