//! Two-region cluster assembly.
//!
//! Wires the stores, replication links, endpoints, controller, and health
//! monitor into one running unit.

use crate::api::ClientApi;
use crate::core::{Hash256, RegionId, Result, TandemConfig};
use crate::monitoring::{init_logging, TandemMetrics};
use crate::region::{
    failure_channel, FailoverController, HealthMonitor, HealthSnapshot, MonitorHandle,
    RegionEndpoint,
};
use crate::store::{LinkStats, MemoryBackend, ReplicatedStore, ReplicationLink};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running active-passive pair.
pub struct Tandem {
    config: TandemConfig,
    backends: [Arc<MemoryBackend>; 2],
    stores: [Arc<ReplicatedStore>; 2],
    controller: Arc<FailoverController>,
    metrics: Arc<TandemMetrics>,
    monitor: MonitorHandle,
    links: Vec<JoinHandle<LinkStats>>,
    link_shutdown: watch::Sender<bool>,
}

impl Tandem {
    /// Assemble and start both regions.
    ///
    /// Must be called from inside a Tokio runtime; the monitor and the two
    /// replication links run as spawned tasks.
    pub fn start(config: TandemConfig) -> Result<Self> {
        config.validate()?;
        init_logging(&config.logging);

        let metrics = Arc::new(TandemMetrics::new());
        let (link_shutdown, shutdown_rx) = watch::channel(false);
        let (reporter, reports) = failure_channel();

        let backend_a = Arc::new(MemoryBackend::new(RegionId::A));
        let backend_b = Arc::new(MemoryBackend::new(RegionId::B));

        let (store_a, outbox_a) = ReplicatedStore::new(RegionId::A, backend_a.clone());
        let (store_b, outbox_b) = ReplicatedStore::new(RegionId::B, backend_b.clone());
        let store_a = Arc::new(store_a.with_metrics(metrics.clone()));
        let store_b = Arc::new(store_b.with_metrics(metrics.clone()));

        let links = vec![
            ReplicationLink::new(outbox_a, store_b.clone(), config.replication.clone())
                .with_metrics(metrics.clone())
                .spawn(shutdown_rx.clone()),
            ReplicationLink::new(outbox_b, store_a.clone(), config.replication.clone())
                .with_metrics(metrics.clone())
                .spawn(shutdown_rx),
        ];

        let endpoint_a = Arc::new(
            RegionEndpoint::new(store_a.clone())
                .with_failure_reporter(reporter.clone())
                .with_metrics(metrics.clone()),
        );
        let endpoint_b = Arc::new(
            RegionEndpoint::new(store_b.clone())
                .with_failure_reporter(reporter)
                .with_metrics(metrics.clone()),
        );

        let controller = Arc::new(
            FailoverController::new(
                endpoint_a.clone(),
                endpoint_b.clone(),
                config.primary_region,
            )?
            .with_metrics(metrics.clone()),
        );

        let monitor = HealthMonitor::new(
            endpoint_a,
            endpoint_b,
            controller.clone(),
            config.health.clone(),
        )
        .with_failure_reports(reports)
        .with_metrics(metrics.clone())
        .spawn();

        info!(
            primary = %config.primary_region,
            failure_threshold = config.health.failure_threshold,
            success_threshold = config.health.success_threshold,
            "Tandem started"
        );

        Ok(Self {
            config,
            backends: [backend_a, backend_b],
            stores: [store_a, store_b],
            controller,
            metrics,
            monitor,
            links,
            link_shutdown,
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TandemConfig {
        &self.config
    }

    /// The routing controller.
    pub fn controller(&self) -> &Arc<FailoverController> {
        &self.controller
    }

    /// Client API bound to this cluster.
    pub fn api(&self) -> ClientApi {
        ClientApi::new(self.controller.clone())
    }

    /// Storage backend of a region, for fault injection.
    pub fn backend(&self, region: RegionId) -> &Arc<MemoryBackend> {
        &self.backends[region.index()]
    }

    /// Replicated store of a region.
    pub fn store(&self, region: RegionId) -> &Arc<ReplicatedStore> {
        &self.stores[region.index()]
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &Arc<TandemMetrics> {
        &self.metrics
    }

    /// Latest health published by the monitor.
    pub fn health(&self) -> HealthSnapshot {
        self.monitor.health()
    }

    /// Full-state anti-entropy pass in both directions.
    ///
    /// Returns how many items each region took from its peer.
    pub async fn reconcile(&self) -> Result<[usize; 2]> {
        let [a, b] = &self.stores;
        let from_b = b.read_all().await?;
        let from_a = a.read_all().await?;
        let applied_a = a.reconcile_from(from_b).await?;
        let applied_b = b.reconcile_from(from_a).await?;
        info!(applied_a, applied_b, "Anti-entropy pass complete");
        Ok([applied_a, applied_b])
    }

    /// Digests of both regions' contents.
    pub async fn digests(&self) -> Result<[Hash256; 2]> {
        Ok([
            self.stores[0].state_digest().await?,
            self.stores[1].state_digest().await?,
        ])
    }

    /// Stop the monitor, then the replication links.
    pub async fn shutdown(self) -> Vec<LinkStats> {
        if self.monitor.shutdown().await.is_none() {
            warn!("Health monitor task ended abnormally");
        }

        let _ = self.link_shutdown.send(true);
        let mut stats = Vec::with_capacity(self.links.len());
        for link in self.links {
            match link.await {
                Ok(s) => stats.push(s),
                Err(e) => warn!(error = %e, "Replication link task ended abnormally"),
            }
        }
        info!("Tandem stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HealthStatus;
    use crate::store::{Item, StorageBackend};
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn fast_config() -> TandemConfig {
        let mut config = TandemConfig::default();
        config.health.probe_interval_ms = 20;
        config.health.probe_timeout_ms = 10;
        config.replication.retry_interval_ms = 5;
        config
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_rejects_bad_config() {
        let mut config = TandemConfig::default();
        config.health.failure_threshold = 0;
        assert!(Tandem::start(config).is_err());
    }

    #[tokio::test]
    async fn test_writes_replicate_to_peer() {
        let tandem = assert_ok!(Tandem::start(fast_config()));
        let api = tandem.api();
        assert_eq!(api.write(br#"{"id": "k", "payload": 7}"#).await.status, 200);

        let store_b = tandem.store(RegionId::B).clone();
        let mut replicated = false;
        for _ in 0..200 {
            if store_b.read("k").await.is_ok() {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(replicated);

        let [a, b] = tandem.digests().await.unwrap();
        assert_eq!(a, b);
        tandem.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitor_marks_failed_region() {
        let tandem = Tandem::start(fast_config()).unwrap();
        tandem.backend(RegionId::B).set_available(false);

        let unhealthy = || tandem.health().status(RegionId::B) == HealthStatus::Unhealthy;
        assert!(wait_until(unhealthy).await);
        assert_eq!(tandem.controller().current_status().active_region, RegionId::A);
        tandem.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_repairs_missed_writes() {
        let tandem = Tandem::start(fast_config()).unwrap();
        let stray = Item::new("stray", b"x".to_vec(), 1, RegionId::B);
        tandem.backend(RegionId::B).merge(stray).await.unwrap();

        let [applied_a, applied_b] = tandem.reconcile().await.unwrap();
        assert_eq!(applied_a, 1);
        assert_eq!(applied_b, 0);
        assert!(tandem.store(RegionId::A).read("stray").await.is_ok());
        tandem.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_links() {
        let tandem = Tandem::start(fast_config()).unwrap();
        let stats = tandem.shutdown().await;
        assert_eq!(stats.len(), 2);
    }
}
