//! Error types for tandem.

use crate::core::types::RegionId;
use thiserror::Error;

/// Result type alias for tandem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem operations.
#[derive(Error, Debug)]
pub enum Error {
    // Data plane errors
    #[error("Storage error in region {region}: {message}")]
    Storage { region: RegionId, message: String },

    #[error("Region {region} unavailable: {message}")]
    Unavailable { region: RegionId, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    // Control plane errors
    #[error("Both regions unhealthy, serving from {0}")]
    Degraded(RegionId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Replication errors
    #[error("Replication frame rejected: {0}")]
    Frame(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Storage failure in `region`.
    pub fn storage(region: RegionId, message: impl Into<String>) -> Self {
        Error::Storage {
            region,
            message: message.into(),
        }
    }

    /// `region` could not be reached.
    pub fn unavailable(region: RegionId, message: impl Into<String>) -> Self {
        Error::Unavailable {
            region,
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound(_))
    }

    /// True for errors that count against a region's health.
    pub fn is_region_failure(&self) -> bool {
        matches!(self, Error::Storage { .. } | Error::Unavailable { .. })
    }

    /// Response status for this error on the client API.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Unavailable { .. } | Error::Degraded(_) => 503,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
