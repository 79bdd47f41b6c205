//! Retry utilities: backoff builders for infrastructure calls.
//!
//! Uses `backon` for exponential backoff with jitter. Delivery retries do
//! not use these; their delay is a pure function of the attempt number
//! (see `delivery::RetryPolicy`) so it survives restarts.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for storage connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Backoff for dispatcher passes that hit an unavailable log or ack store.
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: 10
/// - Jitter enabled
pub fn dispatch_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(10)
        .with_jitter()
}

/// Backoff for returning a claimed task to Pending after an ack store
/// write failed mid-attempt.
///
/// - Min delay: 50ms
/// - Max delay: 5s
/// - Max attempts: 20
/// - Jitter enabled
pub fn ack_write_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(20)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_dispatch_backoff_is_bounded() {
        let delays: Vec<Duration> = dispatch_backoff().build().collect();
        assert_eq!(delays.len(), 10);
        // Jitter adds at most one extra min-delay's worth on top of the cap
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(4)));
    }

    #[test]
    fn test_connection_backoff_attempts() {
        assert_eq!(connection_backoff().build().count(), 30);
    }

    #[test]
    fn test_ack_write_backoff_attempts() {
        assert_eq!(ack_write_backoff().build().count(), 20);
    }
}
