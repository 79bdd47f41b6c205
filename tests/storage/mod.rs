//! Shared storage integration tests.
//!
//! Tests the EventLog, SubscriberStore, AckStore and WatermarkStore
//! interfaces against all implementations. Each implementation module
//! imports these test functions and runs them.

#![allow(dead_code)]

#[macro_use]
pub mod ack_store_tests;
#[macro_use]
pub mod event_log_tests;
#[macro_use]
pub mod subscriber_store_tests;
#[macro_use]
pub mod watermark_store_tests;
