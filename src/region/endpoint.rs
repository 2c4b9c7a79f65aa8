//! Regional endpoint over one replicated store.
//!
//! Serves the client read/write handlers for a region and answers health probes.

use crate::core::{now, Error, RegionId, Result, Timestamp};
use crate::monitoring::TandemMetrics;
use crate::store::{Item, ReplicatedStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Region health status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Region is serving
    Healthy,
    /// Region failed enough consecutive checks to be avoided
    Unhealthy,
}

impl HealthStatus {
    /// True for `Healthy`.
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Something the health monitor can probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Region this probe checks.
    fn region(&self) -> RegionId;

    /// One liveness check. Must not write.
    async fn probe(&self) -> HealthStatus;
}

/// A data-path failure observed by an endpoint.
#[derive(Clone, Debug)]
pub struct FailureReport {
    /// Region that failed
    pub region: RegionId,
    /// Error description
    pub message: String,
    /// When it happened
    pub at: Timestamp,
}

/// Sending half of the data-path failure channel.
#[derive(Clone, Debug)]
pub struct FailureReporter {
    sender: mpsc::UnboundedSender<FailureReport>,
}

impl FailureReporter {
    /// Forward a failure to the health monitor.
    pub fn report(&self, region: RegionId, error: &Error) {
        let report = FailureReport {
            region,
            message: error.to_string(),
            at: now(),
        };
        if self.sender.send(report).is_err() {
            debug!(region = %region, "health monitor gone; failure report discarded");
        }
    }
}

/// Receiving half of the data-path failure channel, owned by the monitor.
#[derive(Debug)]
pub struct FailureReports {
    receiver: mpsc::UnboundedReceiver<FailureReport>,
}

impl FailureReports {
    /// Take everything reported so far.
    pub fn drain(&mut self) -> Vec<FailureReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.receiver.try_recv() {
            reports.push(report);
        }
        reports
    }
}

/// Create a connected reporter/receiver pair.
pub fn failure_channel() -> (FailureReporter, FailureReports) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (FailureReporter { sender }, FailureReports { receiver })
}

/// One region's read/write handlers.
pub struct RegionEndpoint {
    region: RegionId,
    store: Arc<ReplicatedStore>,
    reporter: Option<FailureReporter>,
    metrics: Arc<TandemMetrics>,
}

impl RegionEndpoint {
    /// Create an endpoint over `store`.
    pub fn new(store: Arc<ReplicatedStore>) -> Self {
        Self {
            region: store.region(),
            store,
            reporter: None,
            metrics: Arc::new(TandemMetrics::new()),
        }
    }

    /// Report data-path failures to the health monitor.
    pub fn with_failure_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Share a metrics set.
    pub fn with_metrics(mut self, metrics: Arc<TandemMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Region served.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<ReplicatedStore> {
        &self.store
    }

    /// Every item in the region, ordered by id.
    pub async fn handle_read(&self) -> Result<Vec<Item>> {
        match self.store.read_all().await {
            Ok(items) => {
                self.metrics.region(self.region).reads.inc();
                Ok(items)
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    /// Accept a client write.
    pub async fn handle_write(&self, id: &str, payload: Vec<u8>) -> Result<Item> {
        match self.store.write(id, payload).await {
            Ok(item) => {
                self.metrics.region(self.region).writes.inc();
                Ok(item)
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn unavailable(&self, err: Error) -> Error {
        warn!(region = %self.region, error = %err, "data path failure");
        self.metrics.region(self.region).data_path_errors.inc();
        if let Some(reporter) = &self.reporter {
            reporter.report(self.region, &err);
        }
        match err {
            Error::Unavailable { .. } => err,
            other => Error::unavailable(self.region, other.to_string()),
        }
    }
}

#[async_trait]
impl HealthProbe for RegionEndpoint {
    fn region(&self) -> RegionId {
        self.region
    }

    async fn probe(&self) -> HealthStatus {
        match self.store.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                debug!(region = %self.region, error = %e, "probe failed");
                HealthStatus::Unhealthy
            }
        }
    }
}
