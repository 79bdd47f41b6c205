//! SubscriberStore interface tests.

use protocast::model::{Subscriber, SubscriberFilter};
use protocast::storage::SubscriberStore;

fn subscriber(player_id: &str) -> Subscriber {
    Subscriber::new(
        player_id,
        SubscriberFilter::games(["space", "racing.kart"]).with_tags(["vr"]),
        format!("https://{}.example/hook", player_id),
    )
}

pub async fn test_get_nonexistent<S: SubscriberStore>(store: &S) {
    assert!(store.get("test_sub_missing").await.unwrap().is_none());
}

pub async fn test_upsert_and_get<S: SubscriberStore>(store: &S) {
    let original = subscriber("test_sub_get");
    store.upsert(original.clone()).await.unwrap();

    let fetched = store.get("test_sub_get").await.unwrap().unwrap();
    assert_eq!(fetched.player_id, original.player_id);
    assert_eq!(fetched.filter, original.filter);
    assert_eq!(fetched.endpoint, original.endpoint);
    assert!(fetched.active);
}

pub async fn test_upsert_replaces<S: SubscriberStore>(store: &S) {
    store.upsert(subscriber("test_sub_replace")).await.unwrap();

    let mut replaced = subscriber("test_sub_replace");
    replaced.filter = SubscriberFilter::all();
    replaced.endpoint = "https://elsewhere.example/hook".to_string();
    store.upsert(replaced).await.unwrap();

    let fetched = store.get("test_sub_replace").await.unwrap().unwrap();
    assert_eq!(fetched.filter, SubscriberFilter::all());
    assert_eq!(fetched.endpoint, "https://elsewhere.example/hook");
}

pub async fn test_set_active<S: SubscriberStore>(store: &S) {
    store.upsert(subscriber("test_sub_active")).await.unwrap();

    assert!(store.set_active("test_sub_active", false).await.unwrap());
    assert!(!store.get("test_sub_active").await.unwrap().unwrap().active);

    assert!(store.set_active("test_sub_active", true).await.unwrap());
    assert!(store.get("test_sub_active").await.unwrap().unwrap().active);

    assert!(!store.set_active("test_sub_unknown", false).await.unwrap());
}

pub async fn test_list_filters_inactive_and_orders<S: SubscriberStore>(store: &S) {
    for id in ["test_list_c", "test_list_a", "test_list_b"] {
        store.upsert(subscriber(id)).await.unwrap();
    }
    store.set_active("test_list_b", false).await.unwrap();

    let ours = |list: Vec<Subscriber>| -> Vec<String> {
        list.into_iter()
            .map(|s| s.player_id)
            .filter(|id| id.starts_with("test_list_"))
            .collect()
    };

    assert_eq!(
        ours(store.list(false).await.unwrap()),
        vec!["test_list_a", "test_list_b", "test_list_c"]
    );
    assert_eq!(
        ours(store.list(true).await.unwrap()),
        vec!["test_list_a", "test_list_c"]
    );
}

#[macro_export]
macro_rules! run_subscriber_store_tests {
    ($store:expr) => {
        use $crate::storage::subscriber_store_tests::*;

        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_upsert_and_get($store).await;
        println!("  test_upsert_and_get: PASSED");

        test_upsert_replaces($store).await;
        println!("  test_upsert_replaces: PASSED");

        test_set_active($store).await;
        println!("  test_set_active: PASSED");

        test_list_filters_inactive_and_orders($store).await;
        println!("  test_list_filters_inactive_and_orders: PASSED");
    };
}
