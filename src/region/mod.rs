//! Multi-region Module
//!
//! Provides the active-passive control plane:
//! - Regional endpoints and health probes
//! - Health monitoring with hysteresis
//! - Failover and failback routing

pub mod endpoint;
pub mod failover;
pub mod health;

pub use endpoint::{
    failure_channel, FailureReport, FailureReporter, FailureReports, HealthProbe, HealthStatus,
    RegionEndpoint,
};
pub use failover::{
    FailoverController, FailoverEvent, FailoverEventKind, RoutingDecision, RoutingReason,
};
pub use health::{
    CycleReport, HealthMonitor, HealthSnapshot, HealthTransition, MonitorHandle,
    RegionHealthState,
};
