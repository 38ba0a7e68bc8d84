use async_trait::async_trait;
use tracing::{field, Instrument};

use openid_core::{salt_prefix, Association, StoreError};
use openid_ports::{DynStore, OpenIdStore};

use crate::metrics::Metrics;
use crate::telemetry::annotate_span_with_trace_ids;

/// A thin wrapper around a `DynStore` that creates a tracing span for each store call
/// and, when metrics are attached, counts outcomes.
///
/// Secrets are never recorded; salts only by prefix.
pub struct ObservedStore {
    inner: DynStore,
    db_system: String,
    metrics: Option<Metrics>,
}

impl ObservedStore {
    pub fn new(inner: DynStore, db_system: String) -> Self {
        Self {
            inner,
            db_system,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn span(&self, operation: &'static str) -> tracing::Span {
        let span = tracing::info_span!(
            "db",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = operation
        );
        annotate_span_with_trace_ids(&span);
        span
    }

    fn observe<T>(&self, operation: &'static str, result: &Result<T, StoreError>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(operation, result.is_ok());
        }
        if let Err(err) = result {
            tracing::warn!(db_operation = operation, error = %err, "store operation failed");
        }
    }
}

#[async_trait]
impl OpenIdStore for ObservedStore {
    async fn init(&self) -> Result<(), StoreError> {
        let span = self.span("init");
        let result = async move { self.inner.init().await }
            .instrument(span)
            .await;
        self.observe("init", &result);
        result
    }

    async fn store_association(
        &self,
        server_url: &str,
        association: &Association,
    ) -> Result<(), StoreError> {
        let span = tracing::info_span!(
            "db",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = "store_association",
            server_url = %server_url,
            handle = %association.handle,
            assoc_type = %association.assoc_type,
            lifetime = association.lifetime
        );
        annotate_span_with_trace_ids(&span);
        let result = async move { self.inner.store_association(server_url, association).await }
            .instrument(span)
            .await;
        self.observe("store_association", &result);
        result
    }

    async fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> Result<Option<Association>, StoreError> {
        let span = tracing::info_span!(
            "db",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = "get_association",
            server_url = %server_url,
            handle = %handle.unwrap_or(""),
            found = field::Empty
        );
        annotate_span_with_trace_ids(&span);
        let result = async {
            let found = self.inner.get_association(server_url, handle).await;
            if let Ok(found) = &found {
                tracing::Span::current().record("found", found.is_some());
            }
            found
        }
        .instrument(span)
        .await;
        self.observe("get_association", &result);
        result
    }

    async fn remove_association(
        &self,
        server_url: &str,
        handle: &str,
    ) -> Result<bool, StoreError> {
        let span = tracing::info_span!(
            "db",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = "remove_association",
            server_url = %server_url,
            handle = %handle
        );
        annotate_span_with_trace_ids(&span);
        let result = async move { self.inner.remove_association(server_url, handle).await }
            .instrument(span)
            .await;
        self.observe("remove_association", &result);
        result
    }

    async fn use_nonce(
        &self,
        server_url: &str,
        timestamp: i64,
        salt: &str,
    ) -> Result<bool, StoreError> {
        let span = tracing::info_span!(
            "db",
            trace_id = field::Empty,
            span_id = field::Empty,
            db_system = %self.db_system,
            db_operation = "use_nonce",
            server_url = %server_url,
            timestamp = timestamp,
            salt_prefix = %salt_prefix(salt),
            accepted = field::Empty
        );
        annotate_span_with_trace_ids(&span);
        let result = async {
            let accepted = self.inner.use_nonce(server_url, timestamp, salt).await;
            if let Ok(accepted) = &accepted {
                tracing::Span::current().record("accepted", *accepted);
            }
            accepted
        }
        .instrument(span)
        .await;
        self.observe("use_nonce", &result);
        if let (Some(metrics), Ok(accepted)) = (&self.metrics, &result) {
            metrics.record_nonce(*accepted);
        }
        result
    }

    async fn cleanup_nonces(&self) -> Result<u64, StoreError> {
        let span = self.span("cleanup_nonces");
        let result = async move { self.inner.cleanup_nonces().await }
            .instrument(span)
            .await;
        self.observe("cleanup_nonces", &result);
        if let (Some(metrics), Ok(rows)) = (&self.metrics, &result) {
            metrics.record_purged("openid_nonces", *rows);
        }
        result
    }

    async fn cleanup_associations(&self) -> Result<u64, StoreError> {
        let span = self.span("cleanup_associations");
        let result = async move { self.inner.cleanup_associations().await }
            .instrument(span)
            .await;
        self.observe("cleanup_associations", &result);
        if let (Some(metrics), Ok(rows)) = (&self.metrics, &result) {
            metrics.record_purged("openid_associations", *rows);
        }
        result
    }

    async fn healthcheck(&self) -> Result<(), StoreError> {
        let span = self.span("healthcheck");
        let result = async move { self.inner.healthcheck().await }
            .instrument(span)
            .await;
        self.observe("healthcheck", &result);
        result
    }
}
