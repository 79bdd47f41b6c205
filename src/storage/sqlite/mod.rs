//! SQLite implementations of storage interfaces.

mod ack_store;
mod event_log;
mod subscriber_store;
mod watermark_store;

pub use ack_store::SqliteAckStore;
pub use event_log::SqliteEventLog;
pub use subscriber_store::SqliteSubscriberStore;
pub use watermark_store::SqliteWatermarkStore;

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Result, StorageError};

/// Timestamp column encoding: RFC 3339, UTC, microsecond precision.
pub(crate) fn encode_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

pub(crate) fn decode_optional_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_time).transpose()
}
