//! Delivery worker pool.
//!
//! Workers pull task keys from the shared [`PendingQueue`], claim the task
//! through the ack tracker and make one delivery attempt each time. Failed
//! attempts go back onto the queue with a delay from the [`RetryPolicy`].

mod mock;
mod policy;
mod queue;
mod transport;
mod worker;

pub use mock::{MockTransport, RecordedDelivery};
pub use policy::{RetryDecision, RetryPolicy};
pub use queue::PendingQueue;
pub use transport::{HttpTransport, DELIVERY_ID_HEADER};
pub use worker::{DeliveryWorker, WorkOutcome};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::utils::bootstrap::shutdown_requested;

/// Running delivery workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers that run until `shutdown` flips to `true` or
    /// the queue is closed. A worker finishes its current attempt first.
    pub fn spawn(
        worker: Arc<DeliveryWorker>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let count = count.max(1);
        let handles = (0..count)
            .map(|id| {
                let worker = worker.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_worker(id, worker, shutdown))
            })
            .collect();
        info!(workers = count, "Delivery workers started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Delivery worker panicked");
            }
        }
    }
}

async fn run_worker(id: usize, worker: Arc<DeliveryWorker>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let key = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            key = worker.queue().pop() => key,
        };
        let Some(key) = key else {
            break;
        };

        if let Err(e) = worker.process(&key).await {
            // Task may stay InFlight; startup recovery returns it to Pending.
            error!(worker = id, task = %key, error = %e, "Delivery attempt aborted");
        }
    }
    debug!(worker = id, "Delivery worker stopped");
}
