use async_trait::async_trait;
use std::sync::Arc;

use openid_core::{Association, StoreError};

/// Storage contract expected by the OpenID relying-party library.
///
/// Every backend implements the same six protocol operations plus
/// bootstrap and health probes.
#[async_trait]
pub trait OpenIdStore: Send + Sync {
    /// Initialize the backing store (e.g., bootstrap schema / create indexes).
    async fn init(&self) -> Result<(), StoreError>;

    // Association operations
    async fn store_association(
        &self,
        server_url: &str,
        association: &Association,
    ) -> Result<(), StoreError>;

    /// Newest non-expired association for `server_url`, narrowed to `handle`
    /// when given. Expired matches are deleted as a side effect.
    async fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> Result<Option<Association>, StoreError>;

    /// Returns whether anything was removed.
    async fn remove_association(&self, server_url: &str, handle: &str)
        -> Result<bool, StoreError>;

    // Nonce operations

    /// `true` only the first time a triple is seen inside the skew window.
    async fn use_nonce(
        &self,
        server_url: &str,
        timestamp: i64,
        salt: &str,
    ) -> Result<bool, StoreError>;

    // Maintenance sweeps, meant to run periodically rather than per request.
    async fn cleanup_nonces(&self) -> Result<u64, StoreError>;
    async fn cleanup_associations(&self) -> Result<u64, StoreError>;

    /// Lightweight liveness/readiness check.
    ///
    /// Implementations may override to do something cheaper than `init()`.
    async fn healthcheck(&self) -> Result<(), StoreError> {
        self.init().await
    }
}

pub type DynStore = Arc<dyn OpenIdStore>;
