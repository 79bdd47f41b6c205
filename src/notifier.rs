//! Notifier: composes the event log, registry, dispatcher, worker pool and
//! ack tracker into one running pipeline.
//!
//! Owns the background tasks and exposes the submission, registration and
//! operator operations the HTTP layer calls.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::delivery::{DeliveryWorker, PendingQueue, RetryPolicy, WorkerPool};
use crate::dispatch::{DispatchError, DispatchReport, Dispatcher};
use crate::dlq::{AbandonCause, DeadLetter, DeadLetterPublisher};
use crate::interfaces::DeliveryTransport;
use crate::model::{
    DeliveryTask, Event, NewEvent, Sequence, Subscriber, SubscriberFilter, TaskCounts, TaskKey,
    TaskState,
};
use crate::registry::{RegistryError, SubscriberRegistry};
use crate::storage::{EventLog, StorageError, Stores};
use crate::tracker::{AckTracker, CancelOutcome, TrackerError};

/// Suggested wait before retrying a throttled submission.
const BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Errors returned to event submitters.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Pending queue at its configured depth; retry later.
    #[error("Notifier busy, retry after {retry_after:?}")]
    Busy { retry_after: Duration },

    #[error("Event log unavailable: {0}")]
    LogUnavailable(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

/// Errors from registration and operator operations.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for notifier operations.
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Operator view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub last_dispatched: Sequence,
    pub log_head: Sequence,
    /// Reason dispatch is halted, if it is.
    pub halted: Option<String>,
    pub tasks: TaskCounts,
}

/// What startup recovery found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// InFlight tasks returned to Pending.
    pub released: usize,
    /// Pending tasks put back on the queue.
    pub requeued: usize,
    /// Tasks referencing a missing event or subscriber.
    pub inconsistent: usize,
}

struct Running {
    dispatcher: JoinHandle<()>,
    pool: WorkerPool,
}

pub struct Notifier {
    log: Arc<dyn EventLog>,
    registry: SubscriberRegistry,
    tracker: AckTracker,
    queue: Arc<PendingQueue>,
    dispatcher: Arc<Dispatcher>,
    worker: Arc<DeliveryWorker>,
    dlq: Arc<dyn DeadLetterPublisher>,
    workers: usize,
    shutdown: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
}

impl Notifier {
    pub fn new(
        config: &Config,
        stores: Stores,
        transport: Arc<dyn DeliveryTransport>,
        dlq: Arc<dyn DeadLetterPublisher>,
    ) -> Self {
        let registry = SubscriberRegistry::new(stores.subscribers);
        let tracker = AckTracker::new(stores.tasks);
        let queue = Arc::new(PendingQueue::new(config.delivery.queue_depth));

        let dispatcher = Arc::new(Dispatcher::new(
            stores.events.clone(),
            registry.clone(),
            tracker.clone(),
            stores.watermarks,
            queue.clone(),
            config.dispatch.batch_size,
        ));
        let worker = Arc::new(DeliveryWorker::new(
            stores.events.clone(),
            registry.clone(),
            tracker.clone(),
            transport,
            queue.clone(),
            dlq.clone(),
            RetryPolicy::from_config(&config.delivery),
            config.delivery.attempt_timeout(),
        ));

        Self {
            log: stores.events,
            registry,
            tracker,
            queue,
            dispatcher,
            worker,
            dlq,
            workers: config.delivery.workers,
            shutdown: watch::Sender::new(false),
            running: Mutex::new(None),
        }
    }

    /// Recover from a previous run, then spawn the dispatcher and workers.
    ///
    /// Calling `start` on a running notifier does nothing; a notifier
    /// stopped with [`shutdown`](Self::shutdown) can be started again.
    pub async fn start(&self) -> Result<RecoveryReport> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(RecoveryReport::default());
        }

        let report = self.recover().await?;

        // Clear a previous shutdown so a stopped notifier can start again.
        self.shutdown.send_replace(false);
        let dispatcher = tokio::spawn(
            self.dispatcher
                .clone()
                .run(self.shutdown.subscribe()),
        );
        let pool = WorkerPool::spawn(self.worker.clone(), self.workers, self.shutdown.subscribe());
        *running = Some(Running { dispatcher, pool });

        info!(
            workers = self.workers,
            released = report.released,
            requeued = report.requeued,
            "Notifier started"
        );
        Ok(report)
    }

    /// Return orphaned InFlight tasks to Pending and re-queue every Pending
    /// task, honouring its retry time. Inconsistent tasks halt dispatch.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        self.dispatcher.load_watermark().await?;

        for task in self.tracker.by_state(TaskState::InFlight).await? {
            if !self.check_references(&task, &mut report).await? {
                continue;
            }
            if self.tracker.release_orphan(&task).await?.is_applied() {
                debug!(task = %task.key(), "Released orphaned task");
                report.released += 1;
            }
        }

        for task in self.tracker.by_state(TaskState::Pending).await? {
            if !self.check_references(&task, &mut report).await? {
                continue;
            }
            let delay = task
                .next_attempt_at
                .and_then(|at| (at - Utc::now()).to_std().ok())
                .unwrap_or(Duration::ZERO);
            if self.queue.push_after(task.key(), delay).await {
                report.requeued += 1;
            }
        }

        if report.released + report.requeued + report.inconsistent > 0 {
            info!(
                released = report.released,
                requeued = report.requeued,
                inconsistent = report.inconsistent,
                "Recovered delivery tasks"
            );
        }
        Ok(report)
    }

    async fn check_references(
        &self,
        task: &DeliveryTask,
        report: &mut RecoveryReport,
    ) -> Result<bool> {
        match self
            .tracker
            .verify_references(task, self.log.as_ref(), &self.registry)
            .await
        {
            Ok(()) => Ok(true),
            Err(e @ TrackerError::Inconsistent { .. }) => {
                report.inconsistent += 1;
                self.dispatcher.halt(e.to_string()).await;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Signal the background tasks to stop and wait for them.
    ///
    /// Workers finish the attempt they are making; tasks left InFlight are
    /// recovered on the next start.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        if let Err(e) = running.dispatcher.await {
            error!(error = %e, "Dispatcher task panicked");
        }
        running.pool.join().await;
        info!("Notifier stopped");
    }

    /// Append an event to the log and wake the dispatcher.
    ///
    /// Throttled with `Busy` while the pending queue is at its configured
    /// depth.
    pub async fn submit(&self, event: NewEvent) -> std::result::Result<Event, SubmitError> {
        validate_event(&event).map_err(SubmitError::InvalidEvent)?;

        if self.queue.is_saturated().await {
            let depth = self.queue.depth().await;
            warn!(
                depth,
                capacity = self.queue.capacity(),
                "Pending queue full, throttling submission"
            );
            return Err(SubmitError::Busy {
                retry_after: BUSY_RETRY_AFTER,
            });
        }

        let event = self.log.append(event).await.map_err(|e| {
            warn!(error = %e, "Event append failed");
            SubmitError::LogUnavailable(e.to_string())
        })?;
        info!(event_id = event.id, game_id = %event.game_id, "Event accepted");

        self.dispatcher.notify_append();
        Ok(event)
    }

    /// Run one dispatch pass now, e.g. when the background loop is not
    /// running.
    pub async fn dispatch_now(&self) -> Result<DispatchReport> {
        Ok(self.dispatcher.run_once().await?)
    }

    pub async fn register(
        &self,
        player_id: &str,
        filter: SubscriberFilter,
        endpoint: &str,
    ) -> Result<Subscriber> {
        Ok(self.registry.register(player_id, filter, endpoint).await?)
    }

    /// Returns `false` if the player is unknown.
    pub async fn deactivate(&self, player_id: &str) -> Result<bool> {
        Ok(self.registry.deactivate(player_id).await?)
    }

    pub async fn subscriber(&self, player_id: &str) -> Result<Option<Subscriber>> {
        Ok(self.registry.get(player_id).await?)
    }

    pub async fn subscribers(&self) -> Result<Vec<Subscriber>> {
        Ok(self.registry.list().await?)
    }

    pub async fn task(&self, event_id: Sequence, player_id: &str) -> Result<Option<DeliveryTask>> {
        Ok(self.tracker.query(event_id, player_id).await?)
    }

    pub async fn tasks_for_event(&self, event_id: Sequence) -> Result<Vec<DeliveryTask>> {
        Ok(self.tracker.tasks_for_event(event_id).await?)
    }

    /// Abandoned tasks.
    pub async fn dead_letters(&self) -> Result<Vec<DeliveryTask>> {
        Ok(self.tracker.dead_letters().await?)
    }

    pub async fn status(&self) -> Result<OperatorStatus> {
        Ok(OperatorStatus {
            queue_depth: self.queue.depth().await,
            queue_capacity: self.queue.capacity(),
            last_dispatched: self.dispatcher.last_dispatched(),
            log_head: self.log.head().await?,
            halted: self.dispatcher.halted().await,
            tasks: self.tracker.counts().await?,
        })
    }

    /// Abandon a Pending or InFlight task immediately.
    pub async fn cancel(&self, event_id: Sequence, player_id: &str) -> Result<CancelOutcome> {
        let key = TaskKey::new(event_id, player_id);
        let outcome = self.tracker.cancel(&key, "cancelled by operator").await?;

        if let CancelOutcome::Cancelled(task) = &outcome {
            self.queue.remove(&key).await;
            let mut dead_letter =
                DeadLetter::new(task, AbandonCause::OperatorCancel, "cancelled by operator");
            if let Some(event) = self.log.get(event_id).await? {
                dead_letter = dead_letter.with_game_id(event.game_id);
            }
            if let Err(e) = self.dlq.publish(dead_letter).await {
                warn!(task = %key, error = %e, "Dead-letter publish failed");
            }
        }
        Ok(outcome)
    }

    /// Clear a dispatch halt. Returns `false` if dispatch was not halted.
    pub async fn resume_dispatch(&self) -> bool {
        self.dispatcher.resume().await
    }
}

fn validate_event(event: &NewEvent) -> std::result::Result<(), String> {
    if event.game_id.trim().is_empty() {
        return Err("gameId must not be empty".to_string());
    }
    if event.tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err("tags must not be empty strings".to_string());
    }
    Ok(())
}
