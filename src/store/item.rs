//! Stored items and the last-writer-wins ordering between them.

use crate::core::RegionId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A versioned key-value entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique key
    pub id: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Version issued by the origin region's clock
    pub version_timestamp: u64,
    /// Region that accepted the client write
    pub origin_region: RegionId,
}

impl Item {
    /// Create an item.
    pub fn new(
        id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        version_timestamp: u64,
        origin_region: RegionId,
    ) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            version_timestamp,
            origin_region,
        }
    }

    /// Last-writer-wins order: greater timestamp first, then region priority.
    ///
    /// `Ordering::Greater` means `self` wins over `other`.
    pub fn lww_cmp(&self, other: &Item) -> Ordering {
        self.version_timestamp
            .cmp(&other.version_timestamp)
            .then_with(|| other.origin_region.cmp(&self.origin_region))
    }

    /// True if `self` should replace `other`.
    pub fn supersedes(&self, other: &Item) -> bool {
        self.lww_cmp(other) == Ordering::Greater
    }
}
