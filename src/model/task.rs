//! Delivery tasks and their state machine.
//!
//! ```text
//! Pending ──claim──> InFlight ──ack──────> Delivered
//!    │                  │ ──failure─────> Pending (retry, backoff)
//!    │                  └──exhausted────> Abandoned
//!    └──operator cancel────────────────> Abandoned
//! ```
//!
//! `InFlight ──cancel──> Abandoned` and crash recovery (`InFlight ──> Pending`)
//! follow the same table. Delivered and Abandoned are terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Sequence;

/// Namespace for deterministic delivery ids.
const DELIVERY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b8e_4d0a_4c57_9a3e_51b2_d7c4_e019);

/// Stable delivery id for an (event, subscriber) pair.
///
/// Identical across retries and restarts so receivers can drop duplicates.
pub fn delivery_id(event_id: Sequence, player_id: &str) -> Uuid {
    Uuid::new_v5(
        &DELIVERY_NAMESPACE,
        format!("{}/{}", event_id, player_id).as_bytes(),
    )
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Delivered,
    Abandoned,
}

impl TaskState {
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::InFlight,
        TaskState::Delivered,
        TaskState::Abandoned,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Delivered | TaskState::Abandoned)
    }

    /// Legal edges of the task state machine.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, Abandoned)
                | (InFlight, Delivered)
                | (InFlight, Pending)
                | (InFlight, Abandoned)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::Delivered => "delivered",
            TaskState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown task state: {}", s))
    }
}

/// Dedup key: at most one task exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskKey {
    pub event_id: Sequence,
    pub player_id: String,
}

impl TaskKey {
    pub fn new(event_id: Sequence, player_id: impl Into<String>) -> Self {
        Self {
            event_id,
            player_id: player_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.player_id)
    }
}

/// Delivery state for one (event, subscriber) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTask {
    pub event_id: Sequence,
    pub player_id: String,
    /// Delivery attempts started so far.
    pub attempt: u32,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time a retry may start.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failure or for abandonment.
    pub last_error: Option<String>,
}

impl DeliveryTask {
    pub fn new(event_id: Sequence, player_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            event_id,
            player_id: player_id.into(),
            attempt: 0,
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
            next_attempt_at: None,
            delivered_at: None,
            last_error: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.event_id, self.player_id.clone())
    }

    pub fn delivery_id(&self) -> Uuid {
        delivery_id(self.event_id, &self.player_id)
    }

    /// Pending with at least one failed attempt behind it.
    pub fn is_retrying(&self) -> bool {
        self.state == TaskState::Pending && self.attempt > 0
    }

    /// Copy of this task moved to `state`, stamped now.
    pub fn transitioned(&self, state: TaskState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Number of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub delivered: usize,
    pub abandoned: usize,
    /// Pending tasks that already failed at least once.
    pub retrying: usize,
}

impl TaskCounts {
    pub fn record(&mut self, task: &DeliveryTask) {
        match task.state {
            TaskState::Pending => self.pending += 1,
            TaskState::InFlight => self.in_flight += 1,
            TaskState::Delivered => self.delivered += 1,
            TaskState::Abandoned => self.abandoned += 1,
        }
        if task.is_retrying() {
            self.retrying += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.delivered + self.abandoned
    }
}
