//! Ack tracker: the single source of truth for delivery task existence
//! and state.
//!
//! Every dedup and resume decision routes through here, and every state
//! change is a compare-and-swap against the expected prior state and
//! attempt. Two workers racing for the same task after a crash-and-restart
//! therefore cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::model::{DeliveryTask, Sequence, TaskCounts, TaskKey, TaskState};
use crate::registry::SubscriberRegistry;
use crate::storage::{AckStore, EventLog, Expected, StorageError, UpsertOutcome};

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors from tracker operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A task references an event or subscriber that does not exist.
    /// Fatal: dispatch must halt until an operator intervenes.
    #[error("Inconsistent task {key}: {reason}")]
    Inconsistent { key: TaskKey, reason: String },

    #[error("Illegal transition for task {key}: {from:?} -> {to}")]
    IllegalTransition {
        key: TaskKey,
        from: Option<TaskState>,
        to: TaskState,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TrackerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Storage(e) if e.is_transient())
    }
}

/// Result of creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(DeliveryTask),
    /// A task already existed for the key; carries the stored task.
    Duplicate(DeliveryTask),
}

impl CreateOutcome {
    pub fn task(&self) -> &DeliveryTask {
        match self {
            CreateOutcome::Created(task) | CreateOutcome::Duplicate(task) => task,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Result of an operator cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(DeliveryTask),
    AlreadyTerminal(TaskState),
    NotFound,
}

/// Tracks per-(event, subscriber) delivery state.
#[derive(Clone)]
pub struct AckTracker {
    store: Arc<dyn AckStore>,
}

impl AckTracker {
    pub fn new(store: Arc<dyn AckStore>) -> Self {
        Self { store }
    }

    /// Compare-and-swap write, refusing edges the state machine forbids.
    ///
    /// `expected = None` inserts a new task, which must be Pending.
    pub async fn upsert(
        &self,
        task: DeliveryTask,
        expected: Option<Expected>,
    ) -> Result<UpsertOutcome> {
        let from = expected.map(|version| version.state);
        let legal = match from {
            None => task.state == TaskState::Pending,
            Some(from) => from.can_transition_to(task.state),
        };
        if !legal {
            return Err(TrackerError::IllegalTransition {
                key: task.key(),
                from,
                to: task.state,
            });
        }
        Ok(self.store.upsert(task, expected).await?)
    }

    pub async fn query(&self, event_id: Sequence, player_id: &str) -> Result<Option<DeliveryTask>> {
        Ok(self.store.get(event_id, player_id).await?)
    }

    /// Create the Pending task for a pair, or report the one already there.
    pub async fn create(&self, event_id: Sequence, player_id: &str) -> Result<CreateOutcome> {
        let task = DeliveryTask::new(event_id, player_id);
        match self.upsert(task.clone(), None).await? {
            UpsertOutcome::Applied => {
                debug!(event_id, player_id = %player_id, "Task created");
                Ok(CreateOutcome::Created(task))
            }
            UpsertOutcome::Duplicate | UpsertOutcome::Conflict { .. } => {
                let existing = self.query(event_id, player_id).await?.ok_or_else(|| {
                    StorageError::Corrupt(format!(
                        "task {}/{} reported duplicate but is missing",
                        event_id, player_id
                    ))
                })?;
                debug!(event_id, player_id = %player_id, state = %existing.state, "Task already exists");
                Ok(CreateOutcome::Duplicate(existing))
            }
        }
    }

    /// Take ownership of a Pending task: Pending -> InFlight, attempt + 1.
    ///
    /// Returns `None` if the task is missing, not Pending, or another
    /// worker won the swap.
    pub async fn claim(&self, key: &TaskKey) -> Result<Option<DeliveryTask>> {
        let Some(current) = self.query(key.event_id, &key.player_id).await? else {
            return Ok(None);
        };
        if current.state != TaskState::Pending {
            return Ok(None);
        }

        let mut claimed = current.transitioned(TaskState::InFlight);
        claimed.attempt += 1;
        claimed.next_attempt_at = None;

        // Fenced on attempt too: a claimer holding a read from before
        // another worker's claim and retry must lose.
        match self.upsert(claimed.clone(), Some(Expected::of(&current))).await? {
            UpsertOutcome::Applied => Ok(Some(claimed)),
            _ => Ok(None),
        }
    }

    /// InFlight -> Delivered.
    pub async fn mark_delivered(&self, task: &DeliveryTask) -> Result<UpsertOutcome> {
        let mut delivered = task.transitioned(TaskState::Delivered);
        delivered.delivered_at = Some(delivered.updated_at);
        delivered.last_error = None;
        self.upsert(delivered, Some(Expected::of(task))).await
    }

    /// InFlight -> Pending, eligible again at `retry_at`.
    pub async fn schedule_retry(
        &self,
        task: &DeliveryTask,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut pending = task.transitioned(TaskState::Pending);
        pending.next_attempt_at = Some(retry_at);
        pending.last_error = Some(error.to_string());
        self.upsert(pending, Some(Expected::of(task))).await
    }

    /// Move a task from its current state to Abandoned.
    pub async fn abandon(&self, task: &DeliveryTask, reason: &str) -> Result<UpsertOutcome> {
        let mut abandoned = task.transitioned(TaskState::Abandoned);
        abandoned.next_attempt_at = None;
        abandoned.last_error = Some(reason.to_string());
        self.upsert(abandoned, Some(Expected::of(task))).await
    }

    /// Abandon a Pending or InFlight task immediately.
    pub async fn cancel(&self, key: &TaskKey, reason: &str) -> Result<CancelOutcome> {
        loop {
            let Some(current) = self.query(key.event_id, &key.player_id).await? else {
                return Ok(CancelOutcome::NotFound);
            };
            if current.state.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(current.state));
            }
            if self.abandon(&current, reason).await?.is_applied() {
                let cancelled = self
                    .query(key.event_id, &key.player_id)
                    .await?
                    .unwrap_or(current);
                warn!(task = %key, reason = %reason, "Task cancelled by operator");
                return Ok(CancelOutcome::Cancelled(cancelled));
            }
            // State moved under us (e.g. a worker claimed it); look again.
        }
    }

    /// Return a task orphaned by a crashed worker to the queue:
    /// InFlight -> Pending. The attempt already started still counts.
    pub async fn release_orphan(&self, task: &DeliveryTask) -> Result<UpsertOutcome> {
        let mut pending = task.transitioned(TaskState::Pending);
        pending.last_error = Some("worker stopped before acknowledgment".to_string());
        self.upsert(pending, Some(Expected::of(task))).await
    }

    /// Fail with `Inconsistent` unless the task's event and subscriber exist.
    pub async fn verify_references(
        &self,
        task: &DeliveryTask,
        log: &dyn EventLog,
        registry: &SubscriberRegistry,
    ) -> Result<()> {
        let reason = if log.get(task.event_id).await?.is_none() {
            Some(format!("event {} not in log", task.event_id))
        } else {
            match registry.get(&task.player_id).await {
                Ok(Some(_)) => None,
                Ok(None) => Some(format!("subscriber {} not registered", task.player_id)),
                Err(crate::registry::RegistryError::Storage(e)) => return Err(e.into()),
                Err(e) => Some(e.to_string()),
            }
        };

        match reason {
            None => Ok(()),
            Some(reason) => {
                error!(task = %task.key(), reason = %reason, "Ack tracker inconsistency");
                Err(TrackerError::Inconsistent {
                    key: task.key(),
                    reason,
                })
            }
        }
    }

    /// Abandoned tasks, for the operator dead-letter view.
    pub async fn dead_letters(&self) -> Result<Vec<DeliveryTask>> {
        Ok(self.store.list_by_state(TaskState::Abandoned).await?)
    }

    pub async fn by_state(&self, state: TaskState) -> Result<Vec<DeliveryTask>> {
        Ok(self.store.list_by_state(state).await?)
    }

    pub async fn tasks_for_event(&self, event_id: Sequence) -> Result<Vec<DeliveryTask>> {
        Ok(self.store.list_for_event(event_id).await?)
    }

    pub async fn counts(&self) -> Result<TaskCounts> {
        Ok(self.store.counts().await?)
    }
}
