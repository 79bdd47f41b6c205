//! In-memory storage implementations.
//!
//! Used for tests and for `storage.type: memory`. Each store exposes
//! failure toggles so tests can simulate an unreachable backend.

mod ack_store;
mod event_log;
mod subscriber_store;
mod watermark_store;

pub use ack_store::MemoryAckStore;
pub use event_log::MemoryEventLog;
pub use subscriber_store::MemorySubscriberStore;
pub use watermark_store::MemoryWatermarkStore;
