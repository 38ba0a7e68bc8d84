//! Periodic expiry sweeps.
//!
//! Nonce and association cleanup is not done per request; a separate
//! process (this runner) calls the sweeps on a fixed interval.

use std::future::Future;
use std::time::Duration;

use openid_core::{system_clock, StoreError};

use crate::config::Config;
use crate::storage::{create_store_with, DynStore, Metrics, OpenIdStore, StoreOptions};
use crate::telemetry::{encode_prometheus_text, init_telemetry, shutdown_telemetry};

/// Rows removed by one pass of both sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub nonces: u64,
    pub associations: u64,
}

/// Run both sweeps once.
pub async fn sweep(store: &dyn OpenIdStore) -> Result<SweepReport, StoreError> {
    let nonces = store.cleanup_nonces().await?;
    let associations = store.cleanup_associations().await?;

    Ok(SweepReport {
        nonces,
        associations,
    })
}

/// What a maintenance loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub passes: u64,
    pub failures: u64,
    /// Rows removed across all successful passes.
    pub swept: SweepReport,
}

/// Sweep every `interval` until `shutdown` resolves.
///
/// The first sweep runs immediately. A failed pass is logged and the loop
/// waits for the next tick. When `metrics` is given, a snapshot of the
/// registry is logged at debug level after every pass.
pub async fn run_maintenance<F>(
    store: DynStore,
    interval: Duration,
    metrics: Option<&Metrics>,
    shutdown: F,
) -> LoopSummary
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut summary = LoopSummary::default();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(
                    passes = summary.passes,
                    failures = summary.failures,
                    "maintenance loop stopping"
                );
                break;
            }
            _ = ticker.tick() => {
                summary.passes += 1;
                match sweep(store.as_ref()).await {
                    Ok(report) => {
                        tracing::info!(
                            nonces = report.nonces,
                            associations = report.associations,
                            "expired rows swept"
                        );
                        summary.swept.nonces += report.nonces;
                        summary.swept.associations += report.associations;
                    }
                    Err(err) => {
                        summary.failures += 1;
                        tracing::error!(error = %err, "sweep failed");
                    }
                }
                if let Some(metrics) = metrics {
                    log_metrics_snapshot(metrics);
                }
            }
        }
    }

    summary
}

/// Render the registry in the Prometheus text format.
pub fn metrics_snapshot(metrics: &Metrics) -> Result<String, prometheus::Error> {
    let text = encode_prometheus_text(&metrics.registry)?;
    Ok(String::from_utf8_lossy(&text).into_owned())
}

fn log_metrics_snapshot(metrics: &Metrics) {
    match metrics_snapshot(metrics) {
        Ok(text) => tracing::debug!(metrics = %text, "metrics snapshot"),
        Err(err) => tracing::warn!(error = %err, "failed to encode metrics"),
    }
}

/// Entry point of the `openid-store` binary.
///
/// A present but unparsable `application.conf` aborts startup instead of
/// falling back to environment defaults.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    config.validate()?;

    init_telemetry(&config.telemetry.service_name)?;
    tracing::info!(config = ?config.sanitized(), "starting openid store maintenance");

    let metrics = if config.telemetry.metrics_enabled {
        Some(Metrics::new()?)
    } else {
        None
    };

    let options = StoreOptions {
        nonce_skew: config.nonce.skew_secs,
        clock: system_clock(),
        metrics: metrics.clone(),
    };
    let store = create_store_with(&config.database.url, options).await?;
    store.init().await?;

    if config.maintenance.run_once {
        let report = sweep(store.as_ref()).await?;
        tracing::info!(
            nonces = report.nonces,
            associations = report.associations,
            "expired rows swept"
        );
        // Single-pass runs exit immediately, so the final counters go to
        // stdout for the cron wrapper to collect.
        if let Some(metrics) = &metrics {
            println!("{}", metrics_snapshot(metrics)?);
        }
    } else if config.maintenance.enabled {
        let interval = Duration::from_secs(config.maintenance.interval_secs);
        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
        };
        let summary = run_maintenance(store, interval, metrics.as_ref(), shutdown).await;
        tracing::info!(
            passes = summary.passes,
            failures = summary.failures,
            nonces = summary.swept.nonces,
            associations = summary.swept.associations,
            "maintenance finished"
        );
    } else {
        tracing::info!("maintenance disabled; nothing to do");
    }

    shutdown_telemetry();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openid_core::{FixedClock, SharedClock};
    use std::sync::Arc;

    async fn sqlite_store(
        clock: SharedClock,
    ) -> Result<(tempfile::TempDir, DynStore), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}", dir.path().join("maintenance.db").display());
        let options = StoreOptions {
            nonce_skew: 300,
            clock,
            metrics: None,
        };
        let store = create_store_with(&url, options).await?;
        store.init().await?;
        Ok((dir, store))
    }

    #[tokio::test]
    async fn sweep_reports_both_tables() -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(FixedClock::new(10_000));
        let (_dir, store) = sqlite_store(clock.clone()).await?;

        assert!(store.use_nonce("https://idp.example", 10_000, "a").await?);
        let assoc = openid_core::Association::new("h1", b"k".to_vec(), 9_000, 500, "HMAC-SHA1");
        store.store_association("https://idp.example", &assoc).await?;

        clock.set(20_000);
        let report = sweep(store.as_ref()).await?;
        assert_eq!(
            report,
            SweepReport {
                nonces: 1,
                associations: 1
            }
        );

        assert_eq!(sweep(store.as_ref()).await?, SweepReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let clock: SharedClock = Arc::new(FixedClock::new(10_000));
        let (_dir, store) = sqlite_store(clock).await?;

        let summary = run_maintenance(
            store,
            Duration::from_millis(10),
            None,
            tokio::time::sleep(Duration::from_millis(55)),
        )
        .await;

        assert!(summary.passes > 0);
        assert_eq!(summary.failures, 0);
        Ok(())
    }

    #[tokio::test]
    async fn loop_accumulates_counts_without_keeping_each_pass(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let clock = Arc::new(FixedClock::new(10_000));
        let (_dir, store) = sqlite_store(clock.clone()).await?;

        assert!(store.use_nonce("https://idp.example", 10_000, "a").await?);
        assert!(store.use_nonce("https://idp.example", 10_000, "b").await?);
        let assoc = openid_core::Association::new("h1", b"k".to_vec(), 9_000, 500, "HMAC-SHA1");
        store.store_association("https://idp.example", &assoc).await?;
        clock.set(20_000);

        let summary = run_maintenance(
            store,
            Duration::from_millis(1),
            None,
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await;

        assert!(summary.passes > 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(
            summary.swept,
            SweepReport {
                nonces: 2,
                associations: 1
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn metrics_are_observable_while_the_loop_runs() -> Result<(), Box<dyn std::error::Error>>
    {
        let metrics = Metrics::new()?;
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}", dir.path().join("metrics.db").display());
        let options = StoreOptions {
            nonce_skew: 300,
            clock: Arc::new(FixedClock::new(10_000)),
            metrics: Some(metrics.clone()),
        };
        let store = create_store_with(&url, options).await?;
        store.init().await?;

        run_maintenance(
            store,
            Duration::from_millis(10),
            Some(&metrics),
            tokio::time::sleep(Duration::from_millis(25)),
        )
        .await;

        let text = metrics_snapshot(&metrics)?;
        assert!(text.contains("openid_store_operations_total"));
        assert!(text.contains("cleanup_nonces"));
        Ok(())
    }
}
