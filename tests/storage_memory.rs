//! In-memory storage contract tests.
//!
//! Run with: cargo test --test storage_memory

mod storage;

use protocast::storage::{
    MemoryAckStore, MemoryEventLog, MemorySubscriberStore, MemoryWatermarkStore,
};

#[tokio::test]
async fn test_memory_event_log() {
    println!("=== Memory EventLog Tests ===");
    let log = MemoryEventLog::new();
    run_event_log_tests!(&log);
    println!("=== All Memory EventLog tests PASSED ===");
}

#[tokio::test]
async fn test_memory_subscriber_store() {
    println!("=== Memory SubscriberStore Tests ===");
    let store = MemorySubscriberStore::new();
    run_subscriber_store_tests!(&store);
    println!("=== All Memory SubscriberStore tests PASSED ===");
}

#[tokio::test]
async fn test_memory_ack_store() {
    println!("=== Memory AckStore Tests ===");
    let store = MemoryAckStore::new();
    run_ack_store_tests!(&store);
    println!("=== All Memory AckStore tests PASSED ===");
}

#[tokio::test]
async fn test_memory_watermark_store() {
    println!("=== Memory WatermarkStore Tests ===");
    let store = MemoryWatermarkStore::new();
    run_watermark_store_tests!(&store);
    println!("=== All Memory WatermarkStore tests PASSED ===");
}
