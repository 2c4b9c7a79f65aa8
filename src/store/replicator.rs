//! Asynchronous propagation between the two regional stores.
//!
//! One `ReplicationLink` drains one store's outbox into the peer store. The
//! link behaves as an unordered, at-least-once channel: frames the peer fails
//! to apply are kept and redelivered, and fault injection can reorder or
//! duplicate frames. The store's merge rule makes both harmless.

use crate::core::{RegionId, ReplicationConfig};
use crate::monitoring::TandemMetrics;
use crate::store::backend::MergeOutcome;
use crate::store::frame::ReplicationFrame;
use crate::store::item::Item;
use crate::store::replicated::{Outbox, ReplicatedStore};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Simulated network misbehavior.
#[derive(Clone, Debug, Default)]
pub struct LinkFaults {
    /// Chance that a frame is delivered twice
    pub duplicate_probability: f64,
    /// Shuffle each batch before delivery
    pub reorder: bool,
}

/// Cumulative link counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames taken from the outbox
    pub sent: u64,
    /// Deliveries that changed the peer
    pub applied: u64,
    /// Deliveries the peer already had or had newer
    pub ignored: u64,
    /// Deliveries that failed and were kept for retry
    pub retried: u64,
    /// Frames dropped because they could not be decoded
    pub dropped: u64,
}

/// Outcome of one `pump` pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub applied: u64,
    pub ignored: u64,
    pub failed: u64,
    /// Frames still awaiting redelivery
    pub pending: usize,
}

/// An encoded frame awaiting delivery, with the version it carries.
#[derive(Clone, Debug)]
struct PendingFrame {
    version: u64,
    origin: RegionId,
    bytes: Vec<u8>,
}

impl PendingFrame {
    fn supersedes(&self, other: &PendingFrame) -> bool {
        self.version > other.version
            || (self.version == other.version && self.origin.outranks(other.origin))
    }
}

/// One-directional replication from a store's outbox to its peer.
pub struct ReplicationLink {
    outbox: Outbox,
    peer: Arc<ReplicatedStore>,
    config: ReplicationConfig,
    faults: LinkFaults,
    /// At most one frame per item id: a newer write makes older frames redundant.
    pending: BTreeMap<String, PendingFrame>,
    sequence: u64,
    stats: LinkStats,
    metrics: Arc<TandemMetrics>,
}

impl ReplicationLink {
    /// Create a link delivering `outbox` into `peer`.
    pub fn new(outbox: Outbox, peer: Arc<ReplicatedStore>, config: ReplicationConfig) -> Self {
        Self {
            outbox,
            peer,
            config,
            faults: LinkFaults::default(),
            pending: BTreeMap::new(),
            sequence: 0,
            stats: LinkStats::default(),
            metrics: Arc::new(TandemMetrics::new()),
        }
    }

    /// Inject delivery faults.
    pub fn with_faults(mut self, faults: LinkFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Share a metrics set.
    pub fn with_metrics(mut self, metrics: Arc<TandemMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Frames awaiting delivery, one per item id.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drain what is queued right now and deliver it, together with any
    /// frames left over from earlier failed deliveries.
    pub async fn pump(&mut self) -> PumpReport {
        while self.pending.len() < self.config.max_batch {
            match self.outbox.try_recv() {
                Some(item) => self.enqueue(item),
                None => break,
            }
        }
        self.deliver_pending().await
    }

    fn enqueue(&mut self, item: Item) {
        self.sequence += 1;
        let id = item.id.clone();
        let version = item.version_timestamp;
        let origin = item.origin_region;
        let frame = ReplicationFrame {
            source: self.outbox.region(),
            sequence: self.sequence,
            item,
        };
        match frame.encode(self.config.compression_threshold) {
            Ok(bytes) => {
                self.stats.sent += 1;
                self.keep_newest(
                    id,
                    PendingFrame {
                        version,
                        origin,
                        bytes,
                    },
                );
            }
            Err(e) => {
                self.stats.dropped += 1;
                error!(
                    source = %frame.source,
                    sequence = frame.sequence,
                    error = %e,
                    "failed to encode replication frame"
                );
            }
        }
    }

    fn keep_newest(&mut self, id: String, frame: PendingFrame) {
        match self.pending.get(&id) {
            Some(existing) if !frame.supersedes(existing) => {}
            _ => {
                self.pending.insert(id, frame);
            }
        }
    }

    async fn deliver_pending(&mut self) -> PumpReport {
        let mut batch: Vec<(String, PendingFrame)> =
            std::mem::take(&mut self.pending).into_iter().collect();
        {
            let mut rng = rand::thread_rng();
            if self.faults.reorder {
                batch.shuffle(&mut rng);
            }
            if self.faults.duplicate_probability > 0.0 {
                let duplicates: Vec<(String, PendingFrame)> = batch
                    .iter()
                    .filter(|_| rng.gen_bool(self.faults.duplicate_probability.min(1.0)))
                    .cloned()
                    .collect();
                batch.extend(duplicates);
            }
        }

        let mut report = PumpReport::default();
        for (id, pending) in batch {
            let frame = match ReplicationFrame::decode(&pending.bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.dropped += 1;
                    error!(error = %e, "dropping undecodable replication frame");
                    continue;
                }
            };

            match self.peer.apply_replicated_write(frame.item).await {
                Ok(MergeOutcome::Applied) => {
                    self.stats.applied += 1;
                    report.applied += 1;
                }
                Ok(MergeOutcome::Ignored) => {
                    self.stats.ignored += 1;
                    report.ignored += 1;
                }
                Err(e) => {
                    self.stats.retried += 1;
                    self.metrics.replication_retries.inc();
                    report.failed += 1;
                    debug!(
                        source = %frame.source,
                        sequence = frame.sequence,
                        error = %e,
                        "peer rejected replicated write; will retry"
                    );
                    self.keep_newest(id, pending);
                }
            }
        }

        report.pending = self.pending.len();
        if report.failed > 0 {
            warn!(
                target_region = %self.peer.region(),
                failed = report.failed,
                pending = report.pending,
                "replication to peer is backing up"
            );
        }
        report
    }

    /// Run the link until `shutdown` flips to true or the source store is dropped.
    ///
    /// Pending frames get one final delivery attempt on the way out.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<LinkStats> {
        info!(
            source = %self.outbox.region(),
            target_region = %self.peer.region(),
            "Starting replication link"
        );

        tokio::spawn(async move {
            let retry = self.config.retry_interval();
            // Set while the peer is refusing frames: the backlog is only
            // redelivered once this deadline passes.
            let mut retry_at: Option<Instant> = None;
            loop {
                let deadline = retry_at;
                tokio::select! {
                    next = self.outbox.recv() => match next {
                        Some(item) => {
                            self.enqueue(item);
                            if retry_at.is_none() {
                                let report = self.pump().await;
                                retry_at = (report.pending > 0).then(|| Instant::now() + retry);
                            }
                        }
                        None => break,
                    },
                    () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() =>
                    {
                        let report = self.pump().await;
                        retry_at = (report.pending > 0).then(|| Instant::now() + retry);
                    }
                    _ = shutdown.changed() => break,
                }
            }

            if !self.pending.is_empty() || self.outbox_has_items() {
                self.pump().await;
            }
            info!(
                source = %self.outbox.region(),
                pending = self.pending.len(),
                "Replication link stopped"
            );
            self.stats
        })
    }

    fn outbox_has_items(&mut self) -> bool {
        match self.outbox.try_recv() {
            Some(item) => {
                self.enqueue(item);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RegionId;
    use crate::store::backend::MemoryBackend;

    struct Pair {
        a: Arc<ReplicatedStore>,
        b: Arc<ReplicatedStore>,
        b_backend: Arc<MemoryBackend>,
        a_to_b: ReplicationLink,
        b_to_a: ReplicationLink,
    }

    fn pair(faults: LinkFaults) -> Pair {
        pair_with(ReplicationConfig::default(), faults)
    }

    fn pair_with(config: ReplicationConfig, faults: LinkFaults) -> Pair {
        let a_backend = Arc::new(MemoryBackend::new(RegionId::A));
        let b_backend = Arc::new(MemoryBackend::new(RegionId::B));
        let (a, a_out) = ReplicatedStore::new(RegionId::A, a_backend);
        let (b, b_out) = ReplicatedStore::new(RegionId::B, b_backend.clone());
        let a = Arc::new(a);
        let b = Arc::new(b);

        Pair {
            a_to_b: ReplicationLink::new(a_out, b.clone(), config.clone())
                .with_faults(faults.clone()),
            b_to_a: ReplicationLink::new(b_out, a.clone(), config).with_faults(faults),
            a,
            b,
            b_backend,
        }
    }

    #[tokio::test]
    async fn test_pump_delivers_to_peer() {
        let mut p = pair(LinkFaults::default());
        p.a.write("k", b"v".to_vec()).await.unwrap();

        let report = p.a_to_b.pump().await;
        assert_eq!(report.applied, 1);
        assert_eq!(p.b.read("k").await.unwrap().payload, b"v".to_vec());
    }

    #[tokio::test]
    async fn test_concurrent_writes_converge_to_later() {
        let mut p = pair(LinkFaults::default());
        p.a.write("x1", b"v1".to_vec()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let v2 = p.b.write("x1", b"v2".to_vec()).await.unwrap();

        p.a_to_b.pump().await;
        p.b_to_a.pump().await;

        assert_eq!(p.a.read("x1").await.unwrap(), v2);
        assert_eq!(p.b.read("x1").await.unwrap(), v2);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let mut p = pair(LinkFaults::default());
        p.b_backend.set_available(false);
        p.a.write("k", b"v".to_vec()).await.unwrap();

        let report = p.a_to_b.pump().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending, 1);

        p.b_backend.set_available(true);
        let report = p.a_to_b.pump().await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(p.a_to_b.stats().retried, 1);
    }

    #[tokio::test]
    async fn test_reordered_duplicated_delivery_converges() {
        let faults = LinkFaults {
            duplicate_probability: 0.5,
            reorder: true,
        };
        let mut p = pair(faults);

        for round in 0..20u8 {
            let key = format!("k{}", round % 4);
            p.a.write(&key, vec![round]).await.unwrap();
            p.b.write(&key, vec![round + 100]).await.unwrap();
        }

        p.a_to_b.pump().await;
        p.b_to_a.pump().await;

        assert_eq!(
            p.a.state_digest().await.unwrap(),
            p.b.state_digest().await.unwrap()
        );
        assert_eq!(p.a.read_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_spawned_link_stops_on_shutdown() {
        let p = pair(LinkFaults::default());
        let (tx, rx) = watch::channel(false);
        let handle = p.a_to_b.spawn(rx);

        p.a.write("k", b"v".to_vec()).await.unwrap();
        for _ in 0..50 {
            if p.b.read("k").await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(p.b.read("k").await.is_ok());

        tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.applied, 1);
    }

    #[tokio::test]
    async fn test_backlog_keeps_newest_frame_per_id() {
        let mut p = pair(LinkFaults::default());
        p.b_backend.set_available(false);
        for round in 0..5u8 {
            p.a.write("k", vec![round]).await.unwrap();
        }
        p.a.write("other", b"o".to_vec()).await.unwrap();

        let report = p.a_to_b.pump().await;
        assert_eq!(report.failed, 2);
        assert_eq!(p.a_to_b.pending(), 2);

        p.a.write("k", vec![9]).await.unwrap();
        p.a_to_b.pump().await;
        assert_eq!(p.a_to_b.pending(), 2);

        p.b_backend.set_available(true);
        let report = p.a_to_b.pump().await;
        assert_eq!(report.applied, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(p.b.read("k").await.unwrap().payload, vec![9]);
    }

    #[tokio::test]
    async fn test_spawned_link_waits_for_retry_deadline() {
        let config = ReplicationConfig {
            retry_interval_ms: 60_000,
            ..ReplicationConfig::default()
        };
        let metrics = Arc::new(TandemMetrics::new());
        let p = pair_with(config, LinkFaults::default());
        p.b_backend.set_available(false);
        let (tx, rx) = watch::channel(false);
        let handle = p.a_to_b.with_metrics(metrics.clone()).spawn(rx);

        p.a.write("k0", b"v".to_vec()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        for i in 1..10 {
            p.a.write(&format!("k{}", i), b"v".to_vec()).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Only the first write hit the offline peer; the rest wait for the deadline.
        assert_eq!(metrics.replication_retries.get(), 1);

        p.b_backend.set_available(true);
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.applied, 10);
        assert_eq!(p.b.read_all().await.unwrap().len(), 10);
    }
}
