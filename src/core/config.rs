//! Runtime configuration.
//!
//! Every threshold the controller relies on is a parameter here rather than a
//! constant. Configuration is plain serde data and can be loaded from JSON.

use crate::core::{Error, RegionId, Result};
use crate::monitoring::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    /// Region that receives traffic at startup and on failback
    pub primary_region: RegionId,
    /// Health checking
    pub health: HealthConfig,
    /// Cross-region replication
    pub replication: ReplicationConfig,
    /// Logging output
    pub logging: LogConfig,
}

impl Default for TandemConfig {
    fn default() -> Self {
        Self {
            primary_region: RegionId::A,
            health: HealthConfig::default(),
            replication: ReplicationConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl TandemConfig {
    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        self.replication.validate()
    }
}

/// Health check thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive probe failures before a healthy region is marked unhealthy
    pub failure_threshold: u32,
    /// Consecutive probe successes before an unhealthy region is marked healthy
    pub success_threshold: u32,
    /// Time between probe cycles (ms)
    pub probe_interval_ms: u64,
    /// Upper bound on a single probe (ms)
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            probe_interval_ms: 1000,
            probe_timeout_ms: 500,
        }
    }
}

impl HealthConfig {
    /// Probe cycle interval.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Single probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(Error::Config("health thresholds must be at least 1".into()));
        }
        if self.probe_interval_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(Error::Config("probe interval and timeout must be non-zero".into()));
        }
        if self.probe_timeout_ms >= self.probe_interval_ms {
            return Err(Error::Config(format!(
                "probe timeout ({}ms) must be shorter than the probe interval ({}ms)",
                self.probe_timeout_ms, self.probe_interval_ms
            )));
        }
        Ok(())
    }
}

/// Replication channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Delay before redelivering frames the peer failed to apply (ms)
    pub retry_interval_ms: u64,
    /// Frames drained from an outbox per pass
    pub max_batch: usize,
    /// Frames larger than this are LZ4-compressed (bytes)
    pub compression_threshold: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 100,
            max_batch: 256,
            compression_threshold: 1024,
        }
    }
}

impl ReplicationConfig {
    /// Retry delay.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(Error::Config("replication retry interval must be non-zero".into()));
        }
        if self.max_batch == 0 {
            return Err(Error::Config("replication batch size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TandemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_region, RegionId::A);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.health.success_threshold, 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TandemConfig::from_json(
            r#"{"primary_region": "B", "health": {"failure_threshold": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.primary_region, RegionId::B);
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.success_threshold, 3);
        assert_eq!(config.replication.max_batch, 256);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let result = TandemConfig::from_json(r#"{"health": {"success_threshold": 0}}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_timeout_must_be_shorter_than_interval() {
        let result = TandemConfig::from_json(
            r#"{"health": {"probe_interval_ms": 100, "probe_timeout_ms": 100}}"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let result = TandemConfig::from_json("{not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
