use std::sync::Arc;

use openid_core::{Association, FixedClock};
use openid_store::storage::{create_store, create_store_with, Metrics, StoreOptions};

#[tokio::test]
async fn storage_factory_rejects_mongo_without_feature() {
    // This test intentionally runs only when the `mongo` feature is NOT enabled.
    // It ensures we fail fast with a clear error message.
    #[cfg(not(feature = "mongo"))]
    {
        let result = create_store("mongodb://localhost:27017/openid_test").await;

        let err = match result {
            Ok(_) => panic!("should error when mongo backend requested without feature"),
            Err(err) => err,
        };

        assert!(
            err.to_string()
                .contains("built without the `mongo` feature"),
            "unexpected error: {err}"
        );
    }
}

/// The factory hands back an observed store that applies the configured skew
/// and counts what it does.
#[tokio::test]
async fn storage_factory_builds_observed_sqlite_store() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("factory.db").display());

    let clock = Arc::new(FixedClock::new(1_000));
    let metrics = Metrics::new()?;
    let options = StoreOptions {
        nonce_skew: 60,
        clock: clock.clone(),
        metrics: Some(metrics.clone()),
    };

    let store = create_store_with(&url, options).await?;
    store.init().await?;
    store.healthcheck().await?;

    assert!(store.use_nonce("https://idp.example", 1_030, "a").await?);
    assert!(!store.use_nonce("https://idp.example", 1_061, "b").await?);

    let assoc = Association::new("h1", b"k".to_vec(), 1_000, 3_600, "HMAC-SHA1");
    store.store_association("https://idp.example", &assoc).await?;
    assert_eq!(
        store.get_association("https://idp.example", None).await?,
        Some(assoc)
    );

    let decisions = &metrics.nonce_decisions_total;
    assert_eq!(decisions.with_label_values(&["accepted"]).get(), 1);
    assert_eq!(decisions.with_label_values(&["rejected"]).get(), 1);

    Ok(())
}
