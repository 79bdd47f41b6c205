//! Delivery, dispatch and dead-letter configuration.

use std::time::Duration;

use serde::Deserialize;

/// Delivery worker pool and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Number of parallel delivery workers. Default: 4.
    pub workers: usize,
    /// Retries allowed after the first attempt before a task is abandoned.
    /// Default: 5.
    pub max_retries: u32,
    /// Base retry delay; attempt `n` waits `base × 2^n`. Default: 200ms.
    pub base_delay_ms: u64,
    /// Cap on a single retry delay. Default: 30s.
    pub max_delay_ms: u64,
    /// Per-attempt deadline for the endpoint call. Default: 5s.
    pub attempt_timeout_ms: u64,
    /// Pending queue depth at which submissions are throttled. Default: 10000.
    pub queue_depth: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 5_000,
            queue_depth: 10_000,
        }
    }
}

impl DeliveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Events read from the log per page. Default: 256.
    pub batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { batch_size: 256 }
    }
}

/// Dead-letter publishing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Publish abandoned tasks to the dead-letter channel. Default: true.
    /// The operator dead-letter view works either way.
    pub enabled: bool,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
