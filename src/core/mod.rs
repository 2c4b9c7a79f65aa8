//! Core utilities and common types for tandem.

pub mod config;
pub mod error;
pub mod types;

pub use config::{HealthConfig, ReplicationConfig, TandemConfig};
pub use error::{Error, Result};
pub use types::*;
