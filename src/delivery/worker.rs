//! Delivery worker: one attempt per popped task key.

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::policy::{RetryDecision, RetryPolicy};
use super::queue::PendingQueue;
use crate::dlq::{AbandonCause, DeadLetter, DeadLetterPublisher};
use crate::interfaces::{DeliveryError, DeliveryNotice, DeliveryTransport};
use crate::model::{DeliveryTask, Event, Subscriber, TaskKey, TaskState};
use crate::registry::{RegistryError, SubscriberRegistry};
use crate::storage::{EventLog, UpsertOutcome};
use crate::tracker::{AckTracker, Result, TrackerError};
use crate::utils::retry::ack_write_backoff;

/// What happened to a task handed to [`DeliveryWorker::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Claim lost: task gone, not Pending, or taken by another worker.
    Skipped,
    Delivered,
    Retrying { attempt: u32, delay: Duration },
    Abandoned,
    /// The ack store failed; the task is back on the queue after `delay`.
    Requeued { delay: Duration },
    /// Attempt ran but the task changed state meanwhile (operator cancel).
    Superseded { actual: Option<TaskState> },
}

/// Shared state for the worker pool. Each call to `process` is independent.
pub struct DeliveryWorker {
    log: Arc<dyn EventLog>,
    registry: SubscriberRegistry,
    tracker: AckTracker,
    transport: Arc<dyn DeliveryTransport>,
    queue: Arc<PendingQueue>,
    dlq: Arc<dyn DeadLetterPublisher>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl DeliveryWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<dyn EventLog>,
        registry: SubscriberRegistry,
        tracker: AckTracker,
        transport: Arc<dyn DeliveryTransport>,
        queue: Arc<PendingQueue>,
        dlq: Arc<dyn DeadLetterPublisher>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            log,
            registry,
            tracker,
            transport,
            queue,
            dlq,
            policy,
            attempt_timeout,
        }
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    /// Claim the task and make one delivery attempt.
    ///
    /// Deactivated subscribers still receive tasks created before the
    /// deactivation.
    ///
    /// A transient ack store failure never strands the task: a failed claim
    /// is re-queued, and a failed write after the claim returns the task to
    /// Pending.
    pub async fn process(&self, key: &TaskKey) -> Result<WorkOutcome> {
        let task = match self.tracker.claim(key).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task = %key, "Claim lost, skipping");
                return Ok(WorkOutcome::Skipped);
            }
            Err(e) if e.is_transient() => {
                let delay = self.policy.delay_for(0);
                warn!(task = %key, error = %e, ?delay, "Claim failed, re-queuing");
                self.queue.push_after(key.clone(), delay).await;
                return Ok(WorkOutcome::Requeued { delay });
            }
            Err(e) => return Err(e),
        };

        match self.attempt(&task).await {
            Err(e) if e.is_transient() => self.release(&task, e).await,
            outcome => outcome,
        }
    }

    /// Deliver a claimed (InFlight) task and record the outcome.
    async fn attempt(&self, task: &DeliveryTask) -> Result<WorkOutcome> {
        let key = &task.key();
        let (event, subscriber) = match self.load(task).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                let reason = "task references a missing event or subscriber";
                error!(task = %key, "Ack tracker inconsistency, abandoning task");
                return self.give_up(task, None, AbandonCause::Inconsistent, reason).await;
            }
            Err(e) => {
                return self
                    .failed(task, None, &DeliveryError::Transport(e.to_string()))
                    .await;
            }
        };

        let notice = DeliveryNotice::new(&event, task);
        debug!(
            task = %key,
            attempt = task.attempt,
            endpoint = %subscriber.endpoint,
            "Delivering"
        );

        let result = tokio::time::timeout(
            self.attempt_timeout,
            self.transport.deliver(&subscriber.endpoint, &notice),
        )
        .await
        .unwrap_or(Err(DeliveryError::Timeout(self.attempt_timeout)));

        match result {
            Ok(()) => match self.tracker.mark_delivered(task).await? {
                UpsertOutcome::Applied => {
                    info!(task = %key, attempt = task.attempt, "Delivered");
                    Ok(WorkOutcome::Delivered)
                }
                outcome => Ok(self.superseded(key, outcome)),
            },
            Err(e) => self.failed(task, Some(&event), &e).await,
        }
    }

    /// Return an InFlight task to Pending after the ack store failed to
    /// record its outcome, then re-queue it. The attempt still counts.
    async fn release(&self, task: &DeliveryTask, cause: TrackerError) -> Result<WorkOutcome> {
        let key = task.key();
        warn!(task = %key, error = %cause, "Ack store write failed, releasing task");

        let released = (|| async { self.tracker.release_orphan(task).await })
            .retry(ack_write_backoff())
            .when(TrackerError::is_transient)
            .notify(|e, delay: Duration| {
                warn!(task = %key, error = %e, ?delay, "Release failed, retrying");
            })
            .await?;

        match released {
            UpsertOutcome::Applied => {
                let delay = self.policy.delay_for(task.attempt);
                self.queue.push_after(key, delay).await;
                Ok(WorkOutcome::Requeued { delay })
            }
            outcome => Ok(self.superseded(&key, outcome)),
        }
    }

    async fn load(
        &self,
        task: &DeliveryTask,
    ) -> std::result::Result<Option<(Event, Subscriber)>, RegistryError> {
        let Some(event) = self.log.get(task.event_id).await? else {
            return Ok(None);
        };
        let subscriber = self.registry.get(&task.player_id).await?;
        Ok(subscriber.map(|s| (event, s)))
    }

    async fn failed(
        &self,
        task: &DeliveryTask,
        event: Option<&Event>,
        error: &DeliveryError,
    ) -> Result<WorkOutcome> {
        let key = task.key();
        match self.policy.decide(task.attempt) {
            RetryDecision::Retry(delay) => {
                let retry_at =
                    Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                let reason = error.to_string();
                match self.tracker.schedule_retry(task, &reason, retry_at).await? {
                    UpsertOutcome::Applied => {
                        warn!(
                            task = %key,
                            attempt = task.attempt,
                            ?delay,
                            error = %error,
                            "Delivery failed, retrying"
                        );
                        self.queue.push_after(key, delay).await;
                        Ok(WorkOutcome::Retrying {
                            attempt: task.attempt,
                            delay,
                        })
                    }
                    outcome => Ok(self.superseded(&key, outcome)),
                }
            }
            RetryDecision::Abandon => {
                let reason = format!("retries exhausted after {} attempts: {}", task.attempt, error);
                self.give_up(task, event, AbandonCause::RetriesExhausted, &reason)
                    .await
            }
        }
    }

    async fn give_up(
        &self,
        task: &DeliveryTask,
        event: Option<&Event>,
        cause: AbandonCause,
        reason: &str,
    ) -> Result<WorkOutcome> {
        let key = task.key();
        match self.tracker.abandon(task, reason).await? {
            UpsertOutcome::Applied => {
                error!(task = %key, attempt = task.attempt, reason = %reason, "Task abandoned");
                let mut dead_letter = DeadLetter::new(task, cause, reason);
                if let Some(event) = event {
                    dead_letter = dead_letter.with_game_id(&event.game_id);
                }
                if let Err(e) = self.dlq.publish(dead_letter).await {
                    warn!(task = %key, error = %e, "Dead-letter publish failed");
                }
                Ok(WorkOutcome::Abandoned)
            }
            outcome => Ok(self.superseded(&key, outcome)),
        }
    }

    fn superseded(&self, key: &TaskKey, outcome: UpsertOutcome) -> WorkOutcome {
        let actual = match outcome {
            UpsertOutcome::Conflict { actual } => actual,
            _ => None,
        };
        warn!(task = %key, ?actual, "Task changed state during delivery, dropping result");
        WorkOutcome::Superseded { actual }
    }
}
