//! Dispatcher: turns new log entries into delivery tasks.
//!
//! Events are fanned out strictly in sequence order. The watermark (last
//! fully dispatched sequence) is persisted only after every task for an
//! event exists, so a pass interrupted mid-event re-runs that event and
//! the ack tracker's dedup fills in exactly the missing tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use futures::StreamExt;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::delivery::PendingQueue;
use crate::model::{Event, Sequence, TaskKey, TaskState};
use crate::registry::{RegistryError, SubscriberRegistry};
use crate::storage::{read_from, EventLog, StorageError, WatermarkStore};
use crate::tracker::{AckTracker, CreateOutcome, TrackerError};
use crate::utils::bootstrap::shutdown_requested;
use crate::utils::retry::dispatch_backoff;

/// Watermark name under which dispatch progress is stored.
pub const WATERMARK: &str = "dispatcher";

/// Idle re-check interval when no append notification arrives.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors from a dispatch pass.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Dispatch stopped after a fatal inconsistency; needs `resume`.
    #[error("Dispatch halted: {reason}")]
    Halted { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tracker(TrackerError),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Halted { .. } => false,
            DispatchError::Storage(e) | DispatchError::Tracker(TrackerError::Storage(e)) => {
                e.is_transient()
            }
            DispatchError::Tracker(_) => false,
        }
    }

    /// Errors that must stop dispatch until an operator intervenes.
    fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::Storage(StorageError::Corrupt(_))
                | DispatchError::Tracker(TrackerError::Inconsistent { .. })
                | DispatchError::Tracker(TrackerError::IllegalTransition { .. })
                | DispatchError::Tracker(TrackerError::Storage(StorageError::Corrupt(_)))
        )
    }
}

impl From<TrackerError> for DispatchError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Storage(e) => DispatchError::Storage(e),
            e => DispatchError::Tracker(e),
        }
    }
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Storage(e) => DispatchError::Storage(e),
            // Stored subscribers were validated on registration.
            RegistryError::SubscriberInvalid { reason } => {
                DispatchError::Storage(StorageError::Corrupt(reason))
            }
        }
    }
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub events: usize,
    pub created: usize,
    pub duplicates: usize,
    pub watermark: Sequence,
}

#[derive(Default)]
struct DispatchState {
    /// Loaded from the watermark store on first pass.
    watermark: Option<Sequence>,
    halted: Option<String>,
}

pub struct Dispatcher {
    log: Arc<dyn EventLog>,
    registry: SubscriberRegistry,
    tracker: AckTracker,
    watermarks: Arc<dyn WatermarkStore>,
    queue: Arc<PendingQueue>,
    batch_size: usize,
    /// Held for a whole pass: dispatch is single-writer.
    state: Mutex<DispatchState>,
    wake: Notify,
    last_dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        log: Arc<dyn EventLog>,
        registry: SubscriberRegistry,
        tracker: AckTracker,
        watermarks: Arc<dyn WatermarkStore>,
        queue: Arc<PendingQueue>,
        batch_size: usize,
    ) -> Self {
        Self {
            log,
            registry,
            tracker,
            watermarks,
            queue,
            batch_size: batch_size.max(1),
            state: Mutex::new(DispatchState::default()),
            wake: Notify::new(),
            last_dispatched: AtomicU64::new(0),
        }
    }

    /// Last fully dispatched sequence (0 before the first event).
    pub fn last_dispatched(&self) -> Sequence {
        self.last_dispatched.load(Ordering::Acquire)
    }

    /// Load the persisted watermark. Safe to call repeatedly.
    pub async fn load_watermark(&self) -> Result<Sequence> {
        let mut state = self.state.lock().await;
        self.watermark(&mut state).await
    }

    async fn watermark(&self, state: &mut DispatchState) -> Result<Sequence> {
        if let Some(watermark) = state.watermark {
            return Ok(watermark);
        }
        let watermark = self.watermarks.get(WATERMARK).await?.unwrap_or(0);
        state.watermark = Some(watermark);
        self.last_dispatched.store(watermark, Ordering::Release);
        Ok(watermark)
    }

    /// Wake the run loop after an append.
    pub fn notify_append(&self) {
        self.wake.notify_one();
    }

    pub async fn halted(&self) -> Option<String> {
        self.state.lock().await.halted.clone()
    }

    /// Stop dispatching until [`resume`](Self::resume) is called.
    pub async fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Dispatch halted, operator intervention required");
        self.state.lock().await.halted = Some(reason);
    }

    /// Clear a halt. Returns `false` if dispatch was not halted.
    pub async fn resume(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(reason) = state.halted.take() else {
            return false;
        };
        // Re-read the watermark in case the operator repaired it.
        state.watermark = None;
        drop(state);

        info!(previous = %reason, "Dispatch resumed by operator");
        self.notify_append();
        true
    }

    /// Fan out every event after the watermark, as of now.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.halted {
            return Err(DispatchError::Halted {
                reason: reason.clone(),
            });
        }

        match self.pass(&mut state).await {
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Dispatch halted, operator intervention required");
                state.halted = Some(e.to_string());
                Err(e)
            }
            result => result,
        }
    }

    async fn pass(&self, state: &mut DispatchState) -> Result<DispatchReport> {
        let watermark = self.watermark(state).await?;
        let head = self.log.head().await?;
        if watermark > head {
            return Err(StorageError::Corrupt(format!(
                "dispatch watermark {} is past log head {}",
                watermark, head
            ))
            .into());
        }

        let mut report = DispatchReport {
            watermark,
            ..Default::default()
        };
        let mut events = read_from(self.log.as_ref(), watermark + 1, self.batch_size);
        while let Some(event) = events.next().await {
            let event = event?;
            self.dispatch_event(&event, &mut report).await?;

            self.watermarks.put(WATERMARK, event.id).await?;
            state.watermark = Some(event.id);
            self.last_dispatched.store(event.id, Ordering::Release);
            report.events += 1;
            report.watermark = event.id;
        }

        if report.events > 0 {
            debug!(
                events = report.events,
                created = report.created,
                duplicates = report.duplicates,
                watermark = report.watermark,
                "Dispatch pass complete"
            );
        }
        Ok(report)
    }

    async fn dispatch_event(&self, event: &Event, report: &mut DispatchReport) -> Result<()> {
        let subscribers = self.registry.matches(event).await?;
        debug!(
            event_id = event.id,
            game_id = %event.game_id,
            matches = subscribers.len(),
            "Dispatching event"
        );

        for subscriber in subscribers {
            let key = TaskKey::new(event.id, subscriber.player_id.as_str());
            match self.tracker.create(event.id, &subscriber.player_id).await? {
                CreateOutcome::Created(_) => {
                    report.created += 1;
                    self.queue.push(key).await;
                }
                CreateOutcome::Duplicate(existing) => {
                    report.duplicates += 1;
                    // Created by an interrupted pass that may not have queued it.
                    if existing.state == TaskState::Pending {
                        self.queue.push(key).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch until `shutdown`, waking on appends and retrying
    /// transient storage failures with backoff.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Dispatcher started");
        loop {
            let result = (|| async { self.run_once().await })
                .retry(dispatch_backoff())
                .when(DispatchError::is_transient)
                .notify(|e, delay: Duration| {
                    warn!(error = %e, ?delay, "Dispatch pass failed, retrying");
                })
                .await;

            match result {
                Ok(_) | Err(DispatchError::Halted { .. }) => {}
                Err(e) => error!(error = %e, "Dispatch pass failed"),
            }

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
        info!("Dispatcher stopped");
    }
}
