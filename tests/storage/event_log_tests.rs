//! EventLog interface tests.

use futures::StreamExt;

use protocast::model::{Event, NewEvent};
use protocast::storage::{read_from, EventLog};

async fn append(log: &dyn EventLog, game_id: &str) -> Event {
    log.append(NewEvent::new(game_id, b"payload".to_vec()))
        .await
        .expect("append should succeed")
}

// =============================================================================
// append / get
// =============================================================================

pub async fn test_append_assigns_next_sequence<S: EventLog>(log: &S) {
    let head = log.head().await.unwrap();

    let first = append(log, "test.append").await;
    let second = append(log, "test.append").await;

    assert_eq!(first.id, head + 1);
    assert_eq!(second.id, head + 2);
    assert_eq!(log.head().await.unwrap(), head + 2);
}

pub async fn test_get_returns_appended_event<S: EventLog>(log: &S) {
    let appended = log
        .append(NewEvent::new("test.get", vec![0u8, 159, 255]).with_tags(["vr", "beta"]))
        .await
        .unwrap();

    let fetched = log
        .get(appended.id)
        .await
        .unwrap()
        .expect("event should exist");

    assert_eq!(fetched.id, appended.id);
    assert_eq!(fetched.game_id, "test.get");
    assert_eq!(fetched.payload.as_ref(), &[0u8, 159, 255]);
    assert_eq!(fetched.tags, vec!["vr", "beta"]);
    assert_eq!(
        fetched.created_at.timestamp_micros(),
        appended.created_at.timestamp_micros()
    );
}

pub async fn test_get_nonexistent<S: EventLog>(log: &S) {
    let head = log.head().await.unwrap();
    assert!(log.get(head + 1000).await.unwrap().is_none());
    assert!(log.get(0).await.unwrap().is_none());
}

// =============================================================================
// read_page / read_from
// =============================================================================

pub async fn test_read_page_bounds<S: EventLog>(log: &S) {
    let head = log.head().await.unwrap();
    for _ in 0..5 {
        append(log, "test.page").await;
    }

    let page = log.read_page(head + 2, head + 4, 10).await.unwrap();
    let ids: Vec<_> = page.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![head + 2, head + 3, head + 4]);

    let limited = log.read_page(head + 1, head + 5, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, head + 1);
}

pub async fn test_read_from_zero_is_ordered_and_gap_free<S: EventLog>(log: &S) {
    for _ in 0..7 {
        append(log, "test.read").await;
    }
    let head = log.head().await.unwrap();

    let events: Vec<_> = read_from(log, 0, 3)
        .map(|e| e.expect("read should succeed").id)
        .collect()
        .await;

    let expected: Vec<_> = (1..=head).collect();
    assert_eq!(events, expected);
}

pub async fn test_read_from_is_restartable<S: EventLog>(log: &S) {
    for _ in 0..4 {
        append(log, "test.restart").await;
    }
    let head = log.head().await.unwrap();

    let tail: Vec<_> = read_from(log, head - 1, 1)
        .map(|e| e.unwrap().id)
        .collect()
        .await;
    assert_eq!(tail, vec![head - 1, head]);

    let past_head: Vec<_> = read_from(log, head + 1, 10).collect().await;
    assert!(past_head.is_empty());
}

pub async fn test_read_from_is_finite_as_of_first_poll<S: EventLog>(log: &S) {
    append(log, "test.finite").await;
    let head = log.head().await.unwrap();

    let mut stream = read_from(log, head, 1);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id, head);

    append(log, "test.finite").await;
    assert!(stream.next().await.is_none());
}

pub async fn test_concurrent_appends_are_distinct<S: EventLog>(log: &S) {
    let head = log.head().await.unwrap();

    let appended = futures::future::join_all(
        (0..20).map(|i| log.append(NewEvent::new("test.concurrent", vec![i as u8]))),
    )
    .await;

    let mut ids: Vec<_> = appended.into_iter().map(|e| e.unwrap().id).collect();
    ids.sort_unstable();
    let expected: Vec<_> = (head + 1..=head + 20).collect();
    assert_eq!(ids, expected);
}

#[macro_export]
macro_rules! run_event_log_tests {
    ($log:expr) => {
        use $crate::storage::event_log_tests::*;

        test_append_assigns_next_sequence($log).await;
        println!("  test_append_assigns_next_sequence: PASSED");

        test_get_returns_appended_event($log).await;
        println!("  test_get_returns_appended_event: PASSED");

        test_get_nonexistent($log).await;
        println!("  test_get_nonexistent: PASSED");

        test_read_page_bounds($log).await;
        println!("  test_read_page_bounds: PASSED");

        test_read_from_zero_is_ordered_and_gap_free($log).await;
        println!("  test_read_from_zero_is_ordered_and_gap_free: PASSED");

        test_read_from_is_restartable($log).await;
        println!("  test_read_from_is_restartable: PASSED");

        test_read_from_is_finite_as_of_first_poll($log).await;
        println!("  test_read_from_is_finite_as_of_first_poll: PASSED");

        test_concurrent_appends_are_distinct($log).await;
        println!("  test_concurrent_appends_are_distinct: PASSED");
    };
}
