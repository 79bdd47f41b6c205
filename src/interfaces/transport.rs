//! Delivery transport interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{DeliveryTask, Event, Sequence};

/// Errors from a single delivery attempt. All are transient from the
/// pipeline's point of view and feed the retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint rejected delivery with status {status}")]
    Rejected { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Body POSTed to a subscriber endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNotice {
    pub delivery_id: Uuid,
    pub event_id: Sequence,
    pub game_id: String,
    /// Base64 of the opaque event payload.
    pub payload: String,
    pub tags: Vec<String>,
    pub attempt: u32,
}

impl DeliveryNotice {
    pub fn new(event: &Event, task: &DeliveryTask) -> Self {
        use base64::Engine as _;

        Self {
            delivery_id: task.delivery_id(),
            event_id: event.id,
            game_id: event.game_id.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(&event.payload),
            tags: event.tags.clone(),
            attempt: task.attempt,
        }
    }
}

/// Sends a notice to a subscriber endpoint.
///
/// `Ok` only on explicit acknowledgment. Implementations need not enforce a
/// deadline; the worker wraps every call in the configured attempt timeout.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, endpoint: &str, notice: &DeliveryNotice) -> Result<(), DeliveryError>;
}
