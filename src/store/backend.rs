//! StorageBackend trait definition and the in-memory backend.
//!
//! A backend is the per-region durable layer under a `ReplicatedStore`.

use crate::core::{Error, RegionId, Result};
use crate::store::item::Item;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Result of merging an item into a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The item replaced the stored value (or filled an empty key)
    Applied,
    /// The stored value wins; nothing changed
    Ignored,
}

/// Core trait for regional storage.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically store `item` unless the current value for its id supersedes it
    /// or is the same version.
    async fn merge(&self, item: Item) -> Result<MergeOutcome>;

    /// Read one item.
    async fn get(&self, id: &str) -> Result<Option<Item>>;

    /// All items, ordered by id.
    async fn scan(&self) -> Result<Vec<Item>>;

    /// Read-only liveness check.
    async fn ping(&self) -> Result<()>;

    /// Number of stored items.
    async fn count(&self) -> Result<u64> {
        Ok(self.scan().await?.len() as u64)
    }
}

/// In-memory backend with fault injection.
///
/// `set_available(false)` makes every operation fail with a storage error and
/// `set_latency` delays every operation, which together cover the failure modes
/// the health monitor has to tell apart from a healthy region.
pub struct MemoryBackend {
    region: RegionId,
    items: RwLock<BTreeMap<String, Item>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend for `region`.
    pub fn new(region: RegionId) -> Self {
        Self {
            region,
            items: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Is the backend accepting operations.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delay applied to every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn check(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_available() {
            return Err(Error::storage(self.region, "backend offline"));
        }
        Ok(())
    }

    fn poisoned(&self) -> Error {
        Error::storage(self.region, "item map lock poisoned")
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn merge(&self, item: Item) -> Result<MergeOutcome> {
        self.check().await?;

        let mut items = self.items.write().map_err(|_| self.poisoned())?;
        let stale = items
            .get(&item.id)
            .map_or(false, |current| !item.supersedes(current));
        if stale {
            return Ok(MergeOutcome::Ignored);
        }

        items.insert(item.id.clone(), item);
        Ok(MergeOutcome::Applied)
    }

    async fn get(&self, id: &str) -> Result<Option<Item>> {
        self.check().await?;
        let items = self.items.read().map_err(|_| self.poisoned())?;
        Ok(items.get(id).cloned())
    }

    async fn scan(&self) -> Result<Vec<Item>> {
        self.check().await?;
        let items = self.items.read().map_err(|_| self.poisoned())?;
        Ok(items.values().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check().await
    }

    async fn count(&self) -> Result<u64> {
        self.check().await?;
        let items = self.items.read().map_err(|_| self.poisoned())?;
        Ok(items.len() as u64)
    }
}
