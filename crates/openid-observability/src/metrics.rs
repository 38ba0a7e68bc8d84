use prometheus::{IntCounterVec, Opts, Registry};

/// Prometheus counters for store traffic.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub operations_total: IntCounterVec,
    pub nonce_decisions_total: IntCounterVec,
    pub rows_purged_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Register the store counters on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let operations_total = IntCounterVec::new(
            Opts::new(
                "openid_store_operations_total",
                "Store operations by name and outcome",
            ),
            &["operation", "outcome"],
        )?;
        let nonce_decisions_total = IntCounterVec::new(
            Opts::new(
                "openid_store_nonce_decisions_total",
                "Nonce checks by decision",
            ),
            &["decision"],
        )?;
        let rows_purged_total = IntCounterVec::new(
            Opts::new(
                "openid_store_rows_purged_total",
                "Rows removed by maintenance sweeps",
            ),
            &["table"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(nonce_decisions_total.clone()))?;
        registry.register(Box::new(rows_purged_total.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            nonce_decisions_total,
            rows_purged_total,
        })
    }

    pub fn record_operation(&self, operation: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_nonce(&self, accepted: bool) {
        let decision = if accepted { "accepted" } else { "rejected" };
        self.nonce_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    pub fn record_purged(&self, table: &str, rows: u64) {
        self.rows_purged_total
            .with_label_values(&[table])
            .inc_by(rows);
    }
}
