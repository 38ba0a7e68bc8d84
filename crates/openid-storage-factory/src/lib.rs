//! Store backend selection for the OpenID store.
//!
//! This crate centralizes URL-based backend selection (SQLx vs Mongo) and wraps
//! the chosen implementation with `ObservedStore` for tracing.

use std::sync::Arc;

use openid_core::{system_clock, SharedClock, StoreError, DEFAULT_NONCE_SKEW_SECS};

pub use openid_observability::{Metrics, ObservedStore};
pub use openid_ports::{DynStore, OpenIdStore};

pub mod sqlx {
    pub use openid_storage_sqlx::SqlxStore;
}

#[cfg(feature = "mongo")]
pub mod mongo {
    pub use openid_storage_mongo::MongoStore;
}

/// Knobs shared by every backend.
#[derive(Clone)]
pub struct StoreOptions {
    pub nonce_skew: i64,
    pub clock: SharedClock,
    pub metrics: Option<Metrics>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            nonce_skew: DEFAULT_NONCE_SKEW_SECS,
            clock: system_clock(),
            metrics: None,
        }
    }
}

/// Create a store backend based on URL scheme, with default options.
pub async fn create_store(database_url: &str) -> Result<DynStore, StoreError> {
    create_store_with(database_url, StoreOptions::default()).await
}

/// Create a store backend based on URL scheme.
///
/// Supported:
/// - `postgres://...` and `sqlite:...` -> SQLx backend
/// - `mongodb://...` and `mongodb+srv://...` -> Mongo backend (requires `--features mongo`)
pub async fn create_store_with(
    database_url: &str,
    options: StoreOptions,
) -> Result<DynStore, StoreError> {
    if database_url.starts_with("mongodb://") || database_url.starts_with("mongodb+srv://") {
        #[cfg(feature = "mongo")]
        {
            let store = mongo::MongoStore::new(database_url)
                .await?
                .with_clock(options.clock.clone())
                .with_nonce_skew(options.nonce_skew);
            return Ok(observe(Arc::new(store), "mongodb", options.metrics));
        }

        #[cfg(not(feature = "mongo"))]
        {
            return Err(StoreError::configuration(
                "MongoDB backend requested but the binary was built without the `mongo` feature",
            ));
        }
    }

    let db_system = db_system_for(database_url).ok_or_else(|| {
        StoreError::configuration(&format!(
            "unsupported database URL scheme: {}",
            database_url.split(':').next().unwrap_or_default()
        ))
    })?;

    let store = openid_storage_sqlx::SqlxStore::new(database_url)
        .await?
        .with_clock(options.clock)
        .with_nonce_skew(options.nonce_skew);

    Ok(observe(Arc::new(store), db_system, options.metrics))
}

fn observe(inner: DynStore, db_system: &str, metrics: Option<Metrics>) -> DynStore {
    let observed = ObservedStore::new(inner, db_system.to_string());
    let observed = match metrics {
        Some(metrics) => observed.with_metrics(metrics),
        None => observed,
    };
    Arc::new(observed)
}

fn db_system_for(database_url: &str) -> Option<&'static str> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Some("postgresql")
    } else if database_url.starts_with("sqlite:") {
        Some("sqlite")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_system_follows_scheme() {
        assert_eq!(db_system_for("postgres://db/openid"), Some("postgresql"));
        assert_eq!(db_system_for("postgresql://db/openid"), Some("postgresql"));
        assert_eq!(db_system_for("sqlite:openid.db"), Some("sqlite"));
        assert_eq!(db_system_for("sqlite://tmp/openid.db"), Some("sqlite"));
        assert_eq!(db_system_for("mysql://db/openid"), None);
    }

    #[tokio::test]
    async fn unknown_scheme_is_a_configuration_error() {
        let err = match create_store("mysql://localhost/openid").await {
            Ok(_) => panic!("mysql should not be accepted"),
            Err(err) => err,
        };
        assert_eq!(err.error, StoreError::CONFIGURATION);
    }
}
