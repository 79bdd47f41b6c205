//! In-memory AckStore.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{DeliveryTask, Sequence, TaskCounts, TaskKey, TaskState};
use crate::storage::{AckStore, Expected, Result, StorageError, UpsertOutcome};

/// Task table held in an ordered map; the write lock makes each upsert
/// an atomic compare-and-swap.
#[derive(Default)]
pub struct MemoryAckStore {
    tasks: RwLock<BTreeMap<TaskKey, DeliveryTask>>,
    /// Remaining inserts allowed before inserts start failing.
    insert_budget: RwLock<Option<usize>>,
    /// Swaps out of this state fail while the count is non-zero.
    swap_failures: RwLock<Option<(TaskState, usize)>>,
}

impl MemoryAckStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more task inserts, then fail every insert with
    /// `StorageError::Unavailable`. Simulates a crash part-way through a
    /// fan-out. `None` lifts the limit.
    pub async fn fail_inserts_after(&self, n: Option<usize>) {
        *self.insert_budget.write().await = n;
    }

    /// Fail the next `n` compare-and-swap writes that would replace a task
    /// in state `from`, with `StorageError::Unavailable`. The stored task is
    /// left unchanged.
    pub async fn fail_next_swaps_from(&self, from: TaskState, n: usize) {
        *self.swap_failures.write().await = Some((from, n));
    }

    async fn take_swap_failure(&self, from: TaskState) -> Option<StorageError> {
        let mut failures = self.swap_failures.write().await;
        match failures.as_mut() {
            Some((state, remaining)) if *state == from && *remaining > 0 => {
                *remaining -= 1;
                Some(StorageError::Unavailable(format!(
                    "ack store rejected write from {}",
                    from
                )))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl AckStore for MemoryAckStore {
    async fn upsert(&self, task: DeliveryTask, expected: Option<Expected>) -> Result<UpsertOutcome> {
        let key = task.key();
        let mut tasks = self.tasks.write().await;
        let stored = tasks.get(&key).map(Expected::of);
        let actual = stored.map(|v| v.state);

        match expected {
            None => {
                if actual.is_some() {
                    return Ok(UpsertOutcome::Duplicate);
                }
                let mut budget = self.insert_budget.write().await;
                if let Some(remaining) = budget.as_mut() {
                    if *remaining == 0 {
                        return Err(StorageError::Unavailable(
                            "ack store rejected insert".to_string(),
                        ));
                    }
                    *remaining -= 1;
                }
                tasks.insert(key, task);
                Ok(UpsertOutcome::Applied)
            }
            Some(expected) if stored == Some(expected) => {
                if let Some(failure) = self.take_swap_failure(expected.state).await {
                    return Err(failure);
                }
                tasks.insert(key, task);
                Ok(UpsertOutcome::Applied)
            }
            Some(_) => Ok(UpsertOutcome::Conflict { actual }),
        }
    }

    async fn get(&self, event_id: Sequence, player_id: &str) -> Result<Option<DeliveryTask>> {
        let key = TaskKey::new(event_id, player_id);
        Ok(self.tasks.read().await.get(&key).cloned())
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<DeliveryTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect())
    }

    async fn list_for_event(&self, event_id: Sequence) -> Result<Vec<DeliveryTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<TaskCounts> {
        let mut counts = TaskCounts::default();
        for task in self.tasks.read().await.values() {
            counts.record(task);
        }
        Ok(counts)
    }
}
