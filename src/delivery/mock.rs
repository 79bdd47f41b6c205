//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::interfaces::{DeliveryError, DeliveryNotice, DeliveryTransport};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDelivery {
    pub endpoint: String,
    pub notice: DeliveryNotice,
    pub outcome: Result<(), String>,
}

/// Transport that replays configured outcomes per endpoint.
///
/// Endpoints without a script acknowledge every call. `pause` holds every
/// call until `resume`, which lets tests fill the pending queue.
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), DeliveryError>>>>,
    recorded: Mutex<Vec<RecordedDelivery>>,
    delay: Mutex<Option<Duration>>,
    paused: watch::Sender<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            recorded: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            paused: watch::Sender::new(false),
        }
    }

    /// Queue outcomes for the next calls to `endpoint`.
    pub async fn script<I>(&self, endpoint: &str, outcomes: I)
    where
        I: IntoIterator<Item = Result<(), DeliveryError>>,
    {
        self.scripts
            .lock()
            .await
            .entry(endpoint.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Make the next `n` calls to `endpoint` fail with a 503.
    pub async fn fail_next(&self, endpoint: &str, n: usize) {
        self.script(
            endpoint,
            (0..n).map(|_| Err(DeliveryError::Rejected { status: 503 })),
        )
        .await;
    }

    /// Sleep this long inside every call.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub async fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.recorded.lock().await.clone()
    }

    /// Calls made to `endpoint`, in order.
    pub async fn deliveries_to(&self, endpoint: &str) -> Vec<RecordedDelivery> {
        self.recorded
            .lock()
            .await
            .iter()
            .filter(|d| d.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn deliver(&self, endpoint: &str, notice: &DeliveryNotice) -> Result<(), DeliveryError> {
        let mut paused = self.paused.subscribe();
        // Sender lives in self, so this only errors if self is gone.
        let _ = paused.wait_for(|p| !*p).await;

        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .scripts
            .lock()
            .await
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));

        self.recorded.lock().await.push(RecordedDelivery {
            endpoint: endpoint.to_string(),
            notice: notice.clone(),
            outcome: outcome.clone().map_err(|e| e.to_string()),
        });
        outcome
    }
}
