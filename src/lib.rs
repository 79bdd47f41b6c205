//! Protocast - prototype availability notifier
//!
//! Accepts "prototype available" events into an append-only log, fans each
//! event out to the players whose filters match, and delivers it to their
//! endpoints with retries, tracking every (event, player) pair until it is
//! acknowledged or abandoned.
//!
//! ```text
//! submit ──> EventLog ──> Dispatcher ──> AckTracker ──> PendingQueue
//!                            │                              │
//!                   SubscriberRegistry              DeliveryWorker pool ──> endpoint
//! ```

pub mod api;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod dlq;
pub mod interfaces;
pub mod model;
pub mod notifier;
pub mod registry;
pub mod storage;
pub mod tracker;
pub mod utils;

pub use notifier::{Notifier, SubmitError};
