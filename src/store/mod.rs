//! Replicated Store Module
//!
//! Per-region key-value storage with asynchronous cross-region propagation:
//! - Versioned items and last-writer-wins ordering
//! - Storage backend seam with an in-memory backend
//! - Replication wire frames
//! - Outbox-draining replication links

pub mod backend;
pub mod frame;
pub mod item;
pub mod replicated;
pub mod replicator;

pub use backend::{MemoryBackend, MergeOutcome, StorageBackend};
pub use frame::ReplicationFrame;
pub use item::Item;
pub use replicated::{Outbox, ReplicatedStore, VersionClock};
pub use replicator::{LinkFaults, LinkStats, PumpReport, ReplicationLink};
