//! Failover management for the active-passive pair.
//!
//! The controller owns the single current `RoutingDecision`. It is published
//! through a `watch` channel: a transition replaces the whole value, so any
//! reader sees either the old decision or the new one.

use crate::core::{now, Error, RegionId, Result, Timestamp};
use crate::monitoring::TandemMetrics;
use crate::region::endpoint::{HealthStatus, RegionEndpoint};
use crate::region::health::HealthSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};

const HISTORY_LIMIT: usize = 128;

/// Why the active region was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingReason {
    /// Startup choice
    Initial,
    /// Primary went unhealthy while the standby was healthy
    Failover,
    /// Primary recovered
    Failback,
}

/// The region currently receiving client traffic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Region receiving traffic
    pub active_region: RegionId,
    /// When this decision was made
    pub since: Timestamp,
    /// Why
    pub reason: RoutingReason,
}

impl RoutingDecision {
    fn new(active_region: RegionId, reason: RoutingReason) -> Self {
        Self {
            active_region,
            since: now(),
            reason,
        }
    }
}

/// Kind of controller event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverEventKind {
    /// Traffic moved to the standby
    Failover,
    /// Traffic moved back to the primary
    Failback,
    /// Both regions unhealthy
    DegradedEntered,
    /// At least one region healthy again
    DegradedCleared,
}

/// Failover event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event ID
    pub id: String,
    /// What happened
    pub kind: FailoverEventKind,
    /// Active region before the event
    pub from: RegionId,
    /// Active region after the event
    pub to: RegionId,
    /// Timestamp
    pub timestamp: Timestamp,
}

impl FailoverEvent {
    fn new(kind: FailoverEventKind, from: RegionId, to: RegionId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            from,
            to,
            timestamp: now(),
        }
    }
}

/// Routes client traffic to one of two regional endpoints.
pub struct FailoverController {
    endpoints: [Arc<RegionEndpoint>; 2],
    primary: RegionId,
    decision: watch::Sender<RoutingDecision>,
    degraded: AtomicBool,
    history: Mutex<VecDeque<FailoverEvent>>,
    metrics: Arc<TandemMetrics>,
}

impl FailoverController {
    /// Create a controller routing to `primary` initially.
    pub fn new(a: Arc<RegionEndpoint>, b: Arc<RegionEndpoint>, primary: RegionId) -> Result<Self> {
        if a.region() != RegionId::A || b.region() != RegionId::B {
            return Err(Error::Config(format!(
                "endpoints must be given as (A, B), got ({}, {})",
                a.region(),
                b.region()
            )));
        }

        let (decision, _) = watch::channel(RoutingDecision::new(primary, RoutingReason::Initial));
        info!(active_region = %primary, "Failover controller initialized");

        Ok(Self {
            endpoints: [a, b],
            primary,
            decision,
            degraded: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
            metrics: Arc::new(TandemMetrics::new()),
        })
    }

    /// Share a metrics set.
    pub fn with_metrics(mut self, metrics: Arc<TandemMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Designated primary region.
    pub fn primary(&self) -> RegionId {
        self.primary
    }

    /// Endpoint of the active region.
    pub fn route(&self) -> Arc<RegionEndpoint> {
        let active = self.decision.borrow().active_region;
        Arc::clone(&self.endpoints[active.index()])
    }

    /// Endpoint of a specific region, regardless of routing.
    pub fn endpoint(&self, region: RegionId) -> Arc<RegionEndpoint> {
        Arc::clone(&self.endpoints[region.index()])
    }

    /// Snapshot of the current decision.
    pub fn current_status(&self) -> RoutingDecision {
        self.decision.borrow().clone()
    }

    /// Receive every future decision, for the traffic-steering collaborator.
    pub fn subscribe(&self) -> watch::Receiver<RoutingDecision> {
        self.decision.subscribe()
    }

    /// Both regions are unhealthy and the last active region is serving anyway.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// `Err(Degraded)` while both regions are unhealthy.
    pub fn check_degraded(&self) -> Result<()> {
        if self.is_degraded() {
            return Err(Error::Degraded(self.current_status().active_region));
        }
        Ok(())
    }

    /// Re-evaluate routing against the latest health.
    ///
    /// Safe to call on every monitor cycle: the decision only changes when the
    /// health of the regions calls for it. Returns the new decision on a switch.
    pub fn on_health(&self, health: &HealthSnapshot) -> Option<RoutingDecision> {
        let primary = self.primary;
        let standby = primary.peer();
        let primary_status = health.status(primary);
        let standby_status = health.status(standby);

        let both_down = primary_status == HealthStatus::Unhealthy
            && standby_status == HealthStatus::Unhealthy;
        self.update_degraded(both_down);

        let mut switched = None;
        self.decision.send_if_modified(|current| {
            let next = if current.active_region == primary
                && primary_status == HealthStatus::Unhealthy
                && standby_status == HealthStatus::Healthy
            {
                Some((standby, RoutingReason::Failover))
            } else if current.active_region == standby && primary_status == HealthStatus::Healthy {
                Some((primary, RoutingReason::Failback))
            } else {
                None
            };

            match next {
                Some((region, reason)) => {
                    let previous = current.active_region;
                    *current = RoutingDecision::new(region, reason);
                    switched = Some((previous, current.clone()));
                    true
                }
                None => false,
            }
        });

        let (previous, decision) = switched?;
        match decision.reason {
            RoutingReason::Failover => {
                self.metrics.failovers.inc();
                warn!(
                    from = %previous,
                    to = %decision.active_region,
                    "Failing over to standby region"
                );
                self.record(FailoverEvent::new(
                    FailoverEventKind::Failover,
                    previous,
                    decision.active_region,
                ));
            }
            RoutingReason::Failback => {
                self.metrics.failbacks.inc();
                info!(
                    from = %previous,
                    to = %decision.active_region,
                    "Failing back to primary region"
                );
                self.record(FailoverEvent::new(
                    FailoverEventKind::Failback,
                    previous,
                    decision.active_region,
                ));
            }
            RoutingReason::Initial => {}
        }
        Some(decision)
    }

    fn update_degraded(&self, both_down: bool) {
        let was = self.degraded.swap(both_down, Ordering::SeqCst);
        if was == both_down {
            return;
        }

        let active = self.current_status().active_region;
        if both_down {
            self.metrics.degraded.set(1.0);
            error!(
                active_region = %active,
                "Both regions unhealthy; continuing to serve from last active region"
            );
            self.record(FailoverEvent::new(FailoverEventKind::DegradedEntered, active, active));
        } else {
            self.metrics.degraded.set(0.0);
            info!(active_region = %active, "Degraded condition cleared");
            self.record(FailoverEvent::new(FailoverEventKind::DegradedCleared, active, active));
        }
    }

    fn record(&self, event: FailoverEvent) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event);
        }
    }

    /// All recorded events, oldest first.
    pub fn history(&self) -> Vec<FailoverEvent> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent `n` events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<FailoverEvent> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, ReplicatedStore};

    fn endpoint(region: RegionId) -> Arc<RegionEndpoint> {
        let (store, _outbox) =
            ReplicatedStore::new(region, Arc::new(MemoryBackend::new(region)));
        Arc::new(RegionEndpoint::new(Arc::new(store)))
    }

    fn controller() -> FailoverController {
        FailoverController::new(endpoint(RegionId::A), endpoint(RegionId::B), RegionId::A).unwrap()
    }

    fn health(a: HealthStatus, b: HealthStatus) -> HealthSnapshot {
        HealthSnapshot::new(a, b)
    }

    use HealthStatus::{Healthy, Unhealthy};

    #[test]
    fn test_initial_decision() {
        let controller = controller();
        let status = controller.current_status();

        assert_eq!(status.active_region, RegionId::A);
        assert_eq!(status.reason, RoutingReason::Initial);
        assert_eq!(controller.route().region(), RegionId::A);
    }

    #[test]
    fn test_endpoints_must_be_ordered() {
        let result =
            FailoverController::new(endpoint(RegionId::B), endpoint(RegionId::A), RegionId::A);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_failover_and_failback() {
        let controller = controller();

        let decision = controller.on_health(&health(Unhealthy, Healthy)).unwrap();
        assert_eq!(decision.active_region, RegionId::B);
        assert_eq!(decision.reason, RoutingReason::Failover);
        assert_eq!(controller.route().region(), RegionId::B);

        let decision = controller.on_health(&health(Healthy, Healthy)).unwrap();
        assert_eq!(decision.active_region, RegionId::A);
        assert_eq!(decision.reason, RoutingReason::Failback);

        let kinds: Vec<FailoverEventKind> = controller.history().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![FailoverEventKind::Failover, FailoverEventKind::Failback]);
    }

    #[test]
    fn test_no_flap_while_primary_down() {
        let controller = controller();
        controller.on_health(&health(Unhealthy, Healthy)).unwrap();
        let settled = controller.current_status();

        for _ in 0..10 {
            assert!(controller.on_health(&health(Unhealthy, Healthy)).is_none());
        }
        assert_eq!(controller.current_status(), settled);
        assert_eq!(controller.history().len(), 1);
    }

    #[test]
    fn test_standby_failure_does_not_move_traffic() {
        let controller = controller();
        assert!(controller.on_health(&health(Healthy, Unhealthy)).is_none());
        assert_eq!(controller.route().region(), RegionId::A);
        assert!(!controller.is_degraded());
    }

    #[test]
    fn test_degraded_keeps_last_active() {
        let controller = controller();
        controller.on_health(&health(Unhealthy, Healthy)).unwrap();

        assert!(controller.on_health(&health(Unhealthy, Unhealthy)).is_none());
        assert!(controller.is_degraded());
        assert_eq!(controller.route().region(), RegionId::B);
        assert!(matches!(controller.check_degraded(), Err(Error::Degraded(RegionId::B))));

        controller.on_health(&health(Unhealthy, Healthy));
        assert!(!controller.is_degraded());
        assert!(controller.check_degraded().is_ok());

        let kinds: Vec<FailoverEventKind> =
            controller.recent_events(2).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![FailoverEventKind::DegradedCleared, FailoverEventKind::DegradedEntered]
        );
    }

    #[test]
    fn test_degraded_from_start_stays_on_primary() {
        let controller = controller();
        assert!(controller.on_health(&health(Unhealthy, Unhealthy)).is_none());
        assert_eq!(controller.route().region(), RegionId::A);
        assert!(controller.is_degraded());
    }

    #[test]
    fn test_primary_b_fails_over_to_a() {
        let controller =
            FailoverController::new(endpoint(RegionId::A), endpoint(RegionId::B), RegionId::B)
                .unwrap();
        assert_eq!(controller.route().region(), RegionId::B);

        let decision = controller.on_health(&health(Healthy, Unhealthy)).unwrap();
        assert_eq!(decision.active_region, RegionId::A);
        assert_eq!(decision.reason, RoutingReason::Failover);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let controller = controller();
        let mut rx = controller.subscribe();

        controller.on_health(&health(Unhealthy, Healthy));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().active_region, RegionId::B);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_route_is_consistent_during_transitions() {
        let controller = Arc::new(controller());

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    for _ in 0..2000 {
                        let status = controller.current_status();
                        let expected = match status.reason {
                            RoutingReason::Failover => RegionId::B,
                            RoutingReason::Initial | RoutingReason::Failback => RegionId::A,
                        };
                        assert_eq!(status.active_region, expected);

                        let routed = controller.route().region();
                        assert!(routed == RegionId::A || routed == RegionId::B);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            controller.on_health(&health(Unhealthy, Healthy));
            controller.on_health(&health(Healthy, Healthy));
            tokio::task::yield_now().await;
        }

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(controller.metrics.failovers.get(), 500);
        assert_eq!(controller.history().len(), HISTORY_LIMIT);
    }
}
