//! Prototype-availability events.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event log sequence number. The first appended event is `1`; `0` means
/// "nothing yet" wherever a watermark or log head is reported.
pub type Sequence = u64;

/// An event accepted by the log.
///
/// Immutable once appended. Identity is the sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Sequence,
    pub game_id: String,
    pub payload: Bytes,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An event as submitted, before the log assigns it a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub game_id: String,
    pub payload: Bytes,
    pub tags: Vec<String>,
}

impl NewEvent {
    pub fn new(game_id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            game_id: game_id.into(),
            payload: payload.into(),
            tags: Vec::new(),
        }
    }

    /// Attach tags used by subscriber filters.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Stamp the submission with its assigned sequence number.
    pub fn into_event(self, id: Sequence, created_at: DateTime<Utc>) -> Event {
        Event {
            id,
            game_id: self.game_id,
            payload: self.payload,
            tags: self.tags,
            created_at,
        }
    }
}

impl Event {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
