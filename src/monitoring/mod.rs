//! Monitoring Module
//!
//! Provides observability for tandem:
//! - Prometheus-style metrics
//! - Structured logging setup

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use metrics::{Counter, Gauge, Histogram, TandemMetrics};
