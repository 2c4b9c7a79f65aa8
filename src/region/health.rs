//! Health monitoring for the two regions.
//!
//! The monitor probes each region on a fixed interval and runs a two-state
//! machine per region with count-based hysteresis. It is the only writer of
//! `RegionHealthState`; everything else sees the published `HealthSnapshot`.

use crate::core::{now, HealthConfig, RegionId, Timestamp};
use crate::monitoring::TandemMetrics;
use crate::region::endpoint::{FailureReports, HealthProbe, HealthStatus};
use crate::region::failover::FailoverController;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Per-region health state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionHealthState {
    /// Region tracked
    pub region: RegionId,
    /// Current status
    pub status: HealthStatus,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Last probe or failure report
    pub last_check_time: Timestamp,
}

impl RegionHealthState {
    /// Optimistic initial state.
    pub fn new(region: RegionId) -> Self {
        Self {
            region,
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_time: now(),
        }
    }

    /// Fold one check result into the state. Returns the new status on a transition.
    pub fn record(&mut self, success: bool, config: &HealthConfig) -> Option<HealthStatus> {
        self.last_check_time = now();

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            if self.status == HealthStatus::Unhealthy
                && self.consecutive_successes >= config.success_threshold
            {
                self.status = HealthStatus::Healthy;
                return Some(self.status);
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.status == HealthStatus::Healthy
                && self.consecutive_failures >= config.failure_threshold
            {
                self.status = HealthStatus::Unhealthy;
                return Some(self.status);
            }
        }
        None
    }
}

/// Externally visible health of both regions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    statuses: [HealthStatus; 2],
}

impl HealthSnapshot {
    /// Build from the status of A and B.
    pub fn new(a: HealthStatus, b: HealthStatus) -> Self {
        Self { statuses: [a, b] }
    }

    /// Status of one region.
    pub fn status(&self, region: RegionId) -> HealthStatus {
        self.statuses[region.index()]
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::new(HealthStatus::Healthy, HealthStatus::Healthy)
    }
}

/// A status change produced by one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthTransition {
    pub region: RegionId,
    pub to: HealthStatus,
}

/// Result of one probe cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Transitions that happened this cycle, in order
    pub transitions: Vec<HealthTransition>,
    /// Health after the cycle
    pub snapshot: HealthSnapshot,
}

/// Probes both regions and drives the failover controller.
pub struct HealthMonitor {
    probes: [Arc<dyn HealthProbe>; 2],
    states: [RegionHealthState; 2],
    config: HealthConfig,
    controller: Arc<FailoverController>,
    reports: Option<FailureReports>,
    publisher: watch::Sender<HealthSnapshot>,
    metrics: Arc<TandemMetrics>,
}

impl HealthMonitor {
    /// Create a monitor over the probes for A and B.
    pub fn new(
        probe_a: Arc<dyn HealthProbe>,
        probe_b: Arc<dyn HealthProbe>,
        controller: Arc<FailoverController>,
        config: HealthConfig,
    ) -> Self {
        let (publisher, _) = watch::channel(HealthSnapshot::default());
        Self {
            probes: [probe_a, probe_b],
            states: [
                RegionHealthState::new(RegionId::A),
                RegionHealthState::new(RegionId::B),
            ],
            config,
            controller,
            reports: None,
            publisher,
            metrics: Arc::new(TandemMetrics::new()),
        }
    }

    /// Count data-path failures reported by the endpoints.
    pub fn with_failure_reports(mut self, reports: FailureReports) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Share a metrics set.
    pub fn with_metrics(mut self, metrics: Arc<TandemMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current state of one region.
    pub fn state(&self, region: RegionId) -> &RegionHealthState {
        &self.states[region.index()]
    }

    /// Current health of both regions.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::new(self.states[0].status, self.states[1].status)
    }

    /// Receive published health changes.
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.publisher.subscribe()
    }

    /// Run one probe cycle and let the controller react.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut transitions = Vec::new();

        // Data-path failures count once per region per cycle, so a burst of
        // failed requests weighs the same as one failed probe.
        if let Some(reports) = self.reports.as_mut() {
            let mut failed = [false; 2];
            for report in reports.drain() {
                debug!(
                    region = %report.region,
                    error = %report.message,
                    "data path failure reported"
                );
                failed[report.region.index()] = true;
            }
            for region in RegionId::ALL {
                if failed[region.index()] {
                    self.apply(region, false, &mut transitions);
                }
            }
        }

        let (a, b) = futures::future::join(
            self.probe_one(RegionId::A),
            self.probe_one(RegionId::B),
        )
        .await;
        self.apply(RegionId::A, a, &mut transitions);
        self.apply(RegionId::B, b, &mut transitions);

        let snapshot = self.snapshot();
        if !transitions.is_empty() {
            self.publisher.send_replace(snapshot.clone());
        }
        self.controller.on_health(&snapshot);

        CycleReport {
            transitions,
            snapshot,
        }
    }

    async fn probe_one(&self, region: RegionId) -> bool {
        let probe = &self.probes[region.index()];
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.probe_timeout(), probe.probe()).await;
        self.metrics
            .probe_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(HealthStatus::Healthy) => true,
            Ok(HealthStatus::Unhealthy) => false,
            Err(_) => {
                debug!(
                    region = %region,
                    timeout_ms = self.config.probe_timeout_ms,
                    "probe timed out"
                );
                false
            }
        }
    }

    fn apply(&mut self, region: RegionId, success: bool, transitions: &mut Vec<HealthTransition>) {
        if !success {
            self.metrics.region(region).probe_failures.inc();
        }

        let state = &mut self.states[region.index()];
        if let Some(to) = state.record(success, &self.config) {
            match to {
                HealthStatus::Unhealthy => warn!(
                    region = %region,
                    failures = state.consecutive_failures,
                    "Region marked unhealthy"
                ),
                HealthStatus::Healthy => info!(
                    region = %region,
                    successes = state.consecutive_successes,
                    "Region recovered"
                ),
            }
            transitions.push(HealthTransition { region, to });
        }
    }

    /// Run cycles on the configured interval until shutdown.
    ///
    /// Shutdown is only observed between cycles: a cycle in progress finishes
    /// (each probe bounded by the timeout) before the task exits.
    pub fn spawn(mut self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let health = self.subscribe();
        let interval = self.config.probe_interval();
        info!(interval_ms = self.config.probe_interval_ms, "Starting health monitor");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                self.run_cycle().await;
            }
            info!("Health monitor stopped");
            self
        });

        MonitorHandle {
            shutdown_tx,
            health,
            task,
        }
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    health: watch::Receiver<HealthSnapshot>,
    task: JoinHandle<HealthMonitor>,
}

impl MonitorHandle {
    /// Latest published health.
    pub fn health(&self) -> HealthSnapshot {
        self.health.borrow().clone()
    }

    /// Receive published health changes.
    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.health.clone()
    }

    /// Stop issuing probes and wait for the task. Returns the monitor with its
    /// final state, or `None` if the task panicked.
    pub async fn shutdown(self) -> Option<HealthMonitor> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.ok()
    }
}
