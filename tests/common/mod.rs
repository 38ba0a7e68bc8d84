use openid_core::{Association, FixedClock};
use openid_ports::OpenIdStore;

/// A minimal contract test suite that every `OpenIdStore` backend must satisfy.
///
/// Expects an empty store whose clock is `clock` and whose nonce skew is
/// `skew`. Sweep counts below assume nothing else writes to the store.
pub async fn run_store_contract(
    store: &dyn OpenIdStore,
    clock: &FixedClock,
    skew: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    // Worked example: live at issuance, gone once expired.
    let server = "https://idp.example";
    let assoc = Association::new("h1", b"k".to_vec(), 1_000, 3_600, "HMAC-SHA1");

    clock.set(1_000);
    store.store_association(server, &assoc).await?;

    let fetched = store
        .get_association(server, None)
        .await?
        .ok_or("association should be found at issuance")?;
    assert_eq!(fetched, assoc);
    assert_eq!(fetched.secret, b"k".to_vec());

    let by_handle = store.get_association(server, Some("h1")).await?;
    assert_eq!(by_handle.as_ref(), Some(&assoc));
    assert!(store.get_association(server, Some("h2")).await?.is_none());

    clock.set(5_000);
    assert!(store.get_association(server, None).await?.is_none());

    // The expired lookup purged the row; it stays gone even back in time.
    clock.set(1_000);
    assert!(store.get_association(server, Some("h1")).await?.is_none());

    // Newest live association wins; expired ones are skipped and purged.
    let server = "https://newest.example";
    let old = Association::new("h-old", b"old".to_vec(), 9_000, 5_000, "HMAC-SHA1");
    let new = Association::new("h-new", b"new".to_vec(), 9_500, 5_000, "HMAC-SHA256");
    let short = Association::new("h-short", b"short".to_vec(), 9_900, 50, "HMAC-SHA256");

    clock.set(9_920);
    store.store_association(server, &old).await?;
    store.store_association(server, &new).await?;
    store.store_association(server, &short).await?;

    let newest = store.get_association(server, None).await?;
    assert_eq!(newest.map(|a| a.handle), Some("h-short".to_string()));

    clock.set(10_000);
    let newest = store.get_association(server, None).await?;
    assert_eq!(newest.map(|a| a.handle), Some("h-new".to_string()));

    let pinned = store.get_association(server, Some("h-old")).await?;
    assert_eq!(pinned, Some(old.clone()));

    clock.set(9_920);
    assert!(
        store.get_association(server, Some("h-short")).await?.is_none(),
        "expired association should have been purged by the earlier lookup"
    );

    // Upsert on (server_url, handle).
    clock.set(10_000);
    let refreshed = Association::new("h-old", b"rotated".to_vec(), 9_990, 5_000, "HMAC-SHA1");
    store.store_association(server, &refreshed).await?;
    let pinned = store.get_association(server, Some("h-old")).await?;
    assert_eq!(pinned, Some(refreshed));

    // Removal reports whether anything existed.
    let server = "https://remove.example";
    let doomed = Association::new("r1", b"r".to_vec(), 10_000, 100, "HMAC-SHA1");
    store.store_association(server, &doomed).await?;
    assert!(store.remove_association(server, "r1").await?);
    assert!(!store.remove_association(server, "r1").await?);
    assert!(!store.remove_association("https://unknown.example", "r1").await?);
    assert!(store.get_association(server, None).await?.is_none());

    // Nonces are accepted exactly once per triple.
    let now = 100_000;
    clock.set(now);
    let server = "https://nonce.example";
    assert!(store.use_nonce(server, now, "salt").await?);
    assert!(!store.use_nonce(server, now, "salt").await?);
    assert!(store.use_nonce(server, now, "salt2").await?);
    assert!(store.use_nonce("https://other.example", now, "salt").await?);

    // Skew window is inclusive; anything beyond it is rejected even if fresh.
    assert!(!store.use_nonce(server, now - skew - 1, "early").await?);
    assert!(!store.use_nonce(server, now + skew + 1, "late").await?);
    assert!(!store.use_nonce(server, now - skew - 1, "early").await?);
    assert!(store.use_nonce(server, now - skew, "edge-low").await?);
    assert!(store.use_nonce(server, now + skew, "edge-high").await?);

    // Nonce sweep removes only rows outside [now - skew, now + skew].
    clock.set(now + 1);
    assert_eq!(store.cleanup_nonces().await?, 1);
    assert!(
        !store.use_nonce(server, now, "salt").await?,
        "in-window nonce should survive the sweep"
    );

    clock.set(now + 3 * skew);
    assert_eq!(store.cleanup_nonces().await?, 4);
    assert_eq!(store.cleanup_nonces().await?, 0);

    // Association sweep removes only rows with issued + lifetime < now.
    let server = "https://sweep.example";
    let edge = Association::new("x1", b"x1".to_vec(), 20_000, 100, "HMAC-SHA1");
    let later = Association::new("x2", b"x2".to_vec(), 20_000, 1_000, "HMAC-SHA1");
    clock.set(20_000);
    store.store_association(server, &edge).await?;
    store.store_association(server, &later).await?;

    // h-old (ends 14_990) and h-new (ends 14_500) are past their lifetime;
    // x1 ends exactly now and is kept by the sweep.
    clock.set(20_100);
    assert_eq!(store.cleanup_associations().await?, 2);
    assert!(store
        .get_association("https://newest.example", None)
        .await?
        .is_none());

    let survivor = store.get_association(server, None).await?;
    assert_eq!(survivor, Some(later.clone()));

    clock.set(21_001);
    assert_eq!(store.cleanup_associations().await?, 1);
    assert!(store.get_association(server, None).await?.is_none());

    Ok(())
}
