//! AckStore interface tests.
//!
//! Each test uses its own event id range so the functions can share one
//! store.

use chrono::{Duration, Utc};

use protocast::model::{DeliveryTask, TaskState};
use protocast::storage::{AckStore, Expected, UpsertOutcome};

// =============================================================================
// Insert / dedup
// =============================================================================

pub async fn test_insert_and_get<S: AckStore>(store: &S) {
    let task = DeliveryTask::new(1001, "alice");
    assert_eq!(
        store.upsert(task.clone(), None).await.unwrap(),
        UpsertOutcome::Applied
    );

    let fetched = store.get(1001, "alice").await.unwrap().unwrap();
    assert_eq!(fetched.state, TaskState::Pending);
    assert_eq!(fetched.attempt, 0);
    assert_eq!(fetched.next_attempt_at, None);
    assert_eq!(fetched.last_error, None);
    assert_eq!(
        fetched.created_at.timestamp_micros(),
        task.created_at.timestamp_micros()
    );

    assert!(store.get(1001, "bob").await.unwrap().is_none());
}

pub async fn test_duplicate_insert_is_noop<S: AckStore>(store: &S) {
    store.upsert(DeliveryTask::new(1002, "alice"), None).await.unwrap();

    let mut other = DeliveryTask::new(1002, "alice");
    other.last_error = Some("should not be stored".to_string());
    assert_eq!(
        store.upsert(other, None).await.unwrap(),
        UpsertOutcome::Duplicate
    );
    assert_eq!(
        store.get(1002, "alice").await.unwrap().unwrap().last_error,
        None
    );
}

// =============================================================================
// Compare-and-swap
// =============================================================================

pub async fn test_swap_applies_on_expected_state<S: AckStore>(store: &S) {
    let task = DeliveryTask::new(1003, "alice");
    store.upsert(task.clone(), None).await.unwrap();

    let mut claimed = task.transitioned(TaskState::InFlight);
    claimed.attempt = 1;
    assert!(store
        .upsert(claimed.clone(), Some(Expected::of(&task)))
        .await
        .unwrap()
        .is_applied());

    let retry_at = Utc::now() + Duration::seconds(30);
    let mut retry = claimed.transitioned(TaskState::Pending);
    retry.next_attempt_at = Some(retry_at);
    retry.last_error = Some("503".to_string());
    assert!(store
        .upsert(retry, Some(Expected::of(&claimed)))
        .await
        .unwrap()
        .is_applied());

    let fetched = store.get(1003, "alice").await.unwrap().unwrap();
    assert_eq!(fetched.state, TaskState::Pending);
    assert_eq!(fetched.attempt, 1);
    assert_eq!(fetched.last_error.as_deref(), Some("503"));
    assert_eq!(
        fetched.next_attempt_at.map(|t| t.timestamp_micros()),
        Some(retry_at.timestamp_micros())
    );
}

pub async fn test_swap_conflict_reports_actual<S: AckStore>(store: &S) {
    let task = DeliveryTask::new(1004, "alice");
    store.upsert(task.clone(), None).await.unwrap();

    let delivered = task.transitioned(TaskState::Delivered);
    assert_eq!(
        store
            .upsert(delivered, Some(Expected::new(TaskState::InFlight, 0)))
            .await
            .unwrap(),
        UpsertOutcome::Conflict {
            actual: Some(TaskState::Pending)
        }
    );
    assert_eq!(
        store.get(1004, "alice").await.unwrap().unwrap().state,
        TaskState::Pending
    );
}

pub async fn test_swap_fenced_on_attempt<S: AckStore>(store: &S) {
    let mut task = DeliveryTask::new(1009, "alice");
    task.attempt = 2;
    store.upsert(task.clone(), None).await.unwrap();

    // Right state, stale attempt
    let mut stale = task.transitioned(TaskState::InFlight);
    stale.attempt = 2;
    assert_eq!(
        store
            .upsert(stale, Some(Expected::new(TaskState::Pending, 1)))
            .await
            .unwrap(),
        UpsertOutcome::Conflict {
            actual: Some(TaskState::Pending)
        }
    );

    let mut claimed = task.transitioned(TaskState::InFlight);
    claimed.attempt = 3;
    assert!(store
        .upsert(claimed, Some(Expected::of(&task)))
        .await
        .unwrap()
        .is_applied());
    assert_eq!(store.get(1009, "alice").await.unwrap().unwrap().attempt, 3);
}

pub async fn test_swap_on_missing_task<S: AckStore>(store: &S) {
    let task = DeliveryTask::new(1005, "ghost").transitioned(TaskState::InFlight);
    assert_eq!(
        store
            .upsert(task, Some(Expected::new(TaskState::Pending, 0)))
            .await
            .unwrap(),
        UpsertOutcome::Conflict { actual: None }
    );
    assert!(store.get(1005, "ghost").await.unwrap().is_none());
}

pub async fn test_concurrent_claims_single_winner<S: AckStore>(store: &S) {
    let task = DeliveryTask::new(1006, "alice");
    store.upsert(task.clone(), None).await.unwrap();

    let claims = futures::future::join_all((0..8).map(|_| {
        let claimed = task.transitioned(TaskState::InFlight);
        store.upsert(claimed, Some(Expected::of(&task)))
    }))
    .await;

    let winners = claims
        .into_iter()
        .filter(|r| r.as_ref().unwrap().is_applied())
        .count();
    assert_eq!(winners, 1);
}

// =============================================================================
// Listing
// =============================================================================

pub async fn test_list_by_state_and_event<S: AckStore>(store: &S) {
    for player in ["carol", "alice", "bob"] {
        store
            .upsert(DeliveryTask::new(1007, player), None)
            .await
            .unwrap();
    }
    let bob = store.get(1007, "bob").await.unwrap().unwrap();
    store
        .upsert(bob.transitioned(TaskState::Abandoned), Some(Expected::of(&bob)))
        .await
        .unwrap();

    let for_event: Vec<_> = store
        .list_for_event(1007)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.player_id)
        .collect();
    assert_eq!(for_event, vec!["alice", "bob", "carol"]);

    let abandoned: Vec<_> = store
        .list_by_state(TaskState::Abandoned)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.event_id == 1007)
        .map(|t| t.player_id)
        .collect();
    assert_eq!(abandoned, vec!["bob"]);
}

pub async fn test_counts<S: AckStore>(store: &S) {
    let before = store.counts().await.unwrap();

    store.upsert(DeliveryTask::new(1008, "a"), None).await.unwrap();
    let mut retrying = DeliveryTask::new(1008, "b");
    retrying.attempt = 2;
    store.upsert(retrying, None).await.unwrap();

    let after = store.counts().await.unwrap();
    assert_eq!(after.pending, before.pending + 2);
    assert_eq!(after.retrying, before.retrying + 1);
    assert_eq!(after.total(), before.total() + 2);
}

#[macro_export]
macro_rules! run_ack_store_tests {
    ($store:expr) => {
        use $crate::storage::ack_store_tests::*;

        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        test_duplicate_insert_is_noop($store).await;
        println!("  test_duplicate_insert_is_noop: PASSED");

        test_swap_applies_on_expected_state($store).await;
        println!("  test_swap_applies_on_expected_state: PASSED");

        test_swap_conflict_reports_actual($store).await;
        println!("  test_swap_conflict_reports_actual: PASSED");

        test_swap_fenced_on_attempt($store).await;
        println!("  test_swap_fenced_on_attempt: PASSED");

        test_swap_on_missing_task($store).await;
        println!("  test_swap_on_missing_task: PASSED");

        test_concurrent_claims_single_winner($store).await;
        println!("  test_concurrent_claims_single_winner: PASSED");

        test_list_by_state_and_event($store).await;
        println!("  test_list_by_state_and_event: PASSED");

        test_counts($store).await;
        println!("  test_counts: PASSED");
    };
}
