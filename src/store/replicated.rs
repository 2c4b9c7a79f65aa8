//! Per-region replicated key-value store.
//!
//! Writes are durable locally before they return and are propagated to the
//! peer region through an outbox that nothing on the write path waits on.
//! Both local and replicated writes go through the same last-writer-wins merge,
//! so delivery order and duplicates never change the converged state.

use crate::core::{now, sha3_256_multi, Error, Hash256, RegionId, Result};
use crate::monitoring::TandemMetrics;
use crate::store::backend::{MergeOutcome, StorageBackend};
use crate::store::item::Item;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Hybrid version clock.
///
/// Issues values that follow wall-clock microseconds but are strictly greater
/// than anything issued or observed before.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version for a local write.
    ///
    /// `None` once `u64::MAX` has been issued or observed: no later version exists.
    pub fn next(&self) -> Option<u64> {
        let wall = now().timestamp_micros().max(0) as u64;
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = wall.max(last.checked_add(1)?);
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Some(candidate),
                Err(current) => last = current,
            }
        }
    }

    /// Advance past a version seen from the peer.
    pub fn observe(&self, version: u64) {
        self.last.fetch_max(version, Ordering::SeqCst);
    }

    /// Highest version issued or observed.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Receiving side of a store's replication outbox.
pub struct Outbox {
    region: RegionId,
    receiver: mpsc::UnboundedReceiver<Item>,
}

impl Outbox {
    /// Region whose writes this outbox carries.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Wait for the next outgoing write. `None` once the store is dropped.
    pub async fn recv(&mut self) -> Option<Item> {
        self.receiver.recv().await
    }

    /// Take a queued write without waiting.
    pub fn try_recv(&mut self) -> Option<Item> {
        self.receiver.try_recv().ok()
    }
}

/// One region's view of the replicated store.
pub struct ReplicatedStore {
    region: RegionId,
    backend: Arc<dyn StorageBackend>,
    clock: VersionClock,
    outbox: mpsc::UnboundedSender<Item>,
    metrics: Arc<TandemMetrics>,
}

impl ReplicatedStore {
    /// Create a store and the outbox its writes are propagated through.
    pub fn new(region: RegionId, backend: Arc<dyn StorageBackend>) -> (Self, Outbox) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let store = Self {
            region,
            backend,
            clock: VersionClock::new(),
            outbox: sender,
            metrics: Arc::new(TandemMetrics::new()),
        };
        (store, Outbox { region, receiver })
    }

    /// Share a metrics set.
    pub fn with_metrics(mut self, metrics: Arc<TandemMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Region this store serves.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Highest version issued or observed by this region.
    pub fn last_version(&self) -> u64 {
        self.clock.last()
    }

    /// Write locally and enqueue propagation to the peer.
    pub async fn write(&self, id: &str, payload: Vec<u8>) -> Result<Item> {
        let version = self.clock.next().ok_or_else(|| {
            warn!(region = %self.region, id, "version clock exhausted; rejecting write");
            Error::storage(self.region, "version clock exhausted")
        })?;
        let item = Item::new(id, payload, version, self.region);

        let outcome = self
            .backend
            .merge(item.clone())
            .await
            .map_err(|e| self.as_storage_error(e))?;
        if outcome == MergeOutcome::Ignored {
            debug!(
                region = %self.region,
                id,
                version = item.version_timestamp,
                "local write superseded by a concurrent replicated write"
            );
        }

        if self.outbox.send(item.clone()).is_err() {
            debug!(region = %self.region, id, "replication outbox closed; write stays local");
        }

        Ok(item)
    }

    /// Current local value for `id`.
    pub async fn read(&self, id: &str) -> Result<Item> {
        self.backend
            .get(id)
            .await
            .map_err(|e| self.as_storage_error(e))?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All locally visible items, ordered by id.
    pub async fn read_all(&self) -> Result<Vec<Item>> {
        self.backend
            .scan()
            .await
            .map_err(|e| self.as_storage_error(e))
    }

    /// Merge a write that originated in the peer region.
    pub async fn apply_replicated_write(&self, item: Item) -> Result<MergeOutcome> {
        self.clock.observe(item.version_timestamp);

        let id = item.id.clone();
        let version = item.version_timestamp;
        let outcome = self
            .backend
            .merge(item)
            .await
            .map_err(|e| self.as_storage_error(e))?;

        let counters = self.metrics.region(self.region);
        match outcome {
            MergeOutcome::Applied => counters.replication_applied.inc(),
            MergeOutcome::Ignored => counters.replication_ignored.inc(),
        }
        trace!(region = %self.region, id = %id, version, ?outcome, "replicated write merged");

        Ok(outcome)
    }

    /// Merge a full snapshot from the peer. Returns how many items changed.
    pub async fn reconcile_from(&self, items: Vec<Item>) -> Result<usize> {
        let mut applied = 0;
        for item in items {
            if self.apply_replicated_write(item).await? == MergeOutcome::Applied {
                applied += 1;
            }
        }
        debug!(region = %self.region, applied, "anti-entropy pass complete");
        Ok(applied)
    }

    /// SHA3-256 over the ordered snapshot. Equal digests mean converged regions.
    pub async fn state_digest(&self) -> Result<Hash256> {
        let items = self.read_all().await?;

        // bincode length-prefixes id and payload, keeping item boundaries unambiguous.
        let encoded = items
            .iter()
            .map(bincode::serialize)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let slices: Vec<&[u8]> = encoded.iter().map(|e| e.as_slice()).collect();
        Ok(sha3_256_multi(&slices))
    }

    /// Read-only liveness check against the backend.
    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await.map_err(|e| self.as_storage_error(e))
    }

    fn as_storage_error(&self, err: Error) -> Error {
        match err {
            Error::Storage { .. } => err,
            other => Error::storage(self.region, other.to_string()),
        }
    }
}
