//! Delivery task storage interface.

use async_trait::async_trait;

use super::Result;
use crate::model::{DeliveryTask, Sequence, TaskCounts, TaskState};

/// The stored task version a compare-and-swap write replaces.
///
/// `attempt` only grows (each claim bumps it), so it fences out writers
/// holding a read from before the last claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub state: TaskState,
    pub attempt: u32,
}

impl Expected {
    pub fn new(state: TaskState, attempt: u32) -> Self {
        Self { state, attempt }
    }

    /// Expect `task` exactly as it was read.
    pub fn of(task: &DeliveryTask) -> Self {
        Self::new(task.state, task.attempt)
    }
}

/// Result of a compare-and-swap upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The write was applied.
    Applied,
    /// Insert requested (`expected = None`) but a task already exists for
    /// the key. A no-op signal, not an error.
    Duplicate,
    /// The stored state or attempt did not match `expected`.
    Conflict { actual: Option<TaskState> },
}

impl UpsertOutcome {
    pub fn is_applied(self) -> bool {
        self == UpsertOutcome::Applied
    }
}

/// Persistence for delivery tasks, keyed by `(event_id, player_id)`.
///
/// `upsert` is the single mutation point for task state.
#[async_trait]
pub trait AckStore: Send + Sync {
    /// Compare-and-swap write of `task` keyed by `(task.event_id, task.player_id)`.
    ///
    /// - `expected = None`: insert only if no task exists for the key.
    /// - `expected = Some(version)`: replace only if the stored task has
    ///   that state and attempt.
    async fn upsert(&self, task: DeliveryTask, expected: Option<Expected>) -> Result<UpsertOutcome>;

    async fn get(&self, event_id: Sequence, player_id: &str) -> Result<Option<DeliveryTask>>;

    /// Tasks in `state`, ordered by `(event_id, player_id)`.
    async fn list_by_state(&self, state: TaskState) -> Result<Vec<DeliveryTask>>;

    /// Tasks for one event, ordered by player id.
    async fn list_for_event(&self, event_id: Sequence) -> Result<Vec<DeliveryTask>>;

    async fn counts(&self) -> Result<TaskCounts>;
}
