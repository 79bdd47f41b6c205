//! Abstract interfaces for notifier components.
//!
//! These traits define the contracts for:
//! - Event log (append-only source of truth)
//! - Subscriber storage (registry persistence)
//! - Ack storage (delivery task state, compare-and-swap)
//! - Watermark storage (dispatcher resume point)
//! - Delivery transport (subscriber endpoint calls)

pub mod ack_store;
pub mod event_log;
pub mod subscriber_store;
pub mod transport;
pub mod watermark_store;

pub use ack_store::{AckStore, Expected, UpsertOutcome};
pub use event_log::{read_from, EventLog, Result, StorageError};
pub use subscriber_store::SubscriberStore;
pub use transport::{DeliveryError, DeliveryNotice, DeliveryTransport};
pub use watermark_store::WatermarkStore;
