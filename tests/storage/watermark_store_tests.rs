//! WatermarkStore interface tests.

use protocast::storage::WatermarkStore;

pub async fn test_get_nonexistent<S: WatermarkStore>(store: &S) {
    assert!(store.get("test_wm_missing").await.unwrap().is_none());
}

pub async fn test_put_and_update<S: WatermarkStore>(store: &S) {
    store.put("test_wm_update", 10).await.unwrap();
    assert_eq!(store.get("test_wm_update").await.unwrap(), Some(10));

    store.put("test_wm_update", 25).await.unwrap();
    assert_eq!(store.get("test_wm_update").await.unwrap(), Some(25));
}

pub async fn test_put_zero<S: WatermarkStore>(store: &S) {
    store.put("test_wm_zero", 0).await.unwrap();
    assert_eq!(store.get("test_wm_zero").await.unwrap(), Some(0));
}

pub async fn test_name_isolation<S: WatermarkStore>(store: &S) {
    store.put("test_wm_iso_a", 1).await.unwrap();
    store.put("test_wm_iso_b", 2).await.unwrap();

    assert_eq!(store.get("test_wm_iso_a").await.unwrap(), Some(1));
    assert_eq!(store.get("test_wm_iso_b").await.unwrap(), Some(2));
}

#[macro_export]
macro_rules! run_watermark_store_tests {
    ($store:expr) => {
        use $crate::storage::watermark_store_tests::*;

        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_put_and_update($store).await;
        println!("  test_put_and_update: PASSED");

        test_put_zero($store).await;
        println!("  test_put_zero: PASSED");

        test_name_isolation($store).await;
        println!("  test_name_isolation: PASSED");
    };
}
