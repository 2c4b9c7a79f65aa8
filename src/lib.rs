//! # Tandem - Active-Passive Two-Region Failover
//!
//! A pair of regional deployments behind one logical service:
//! - **Store**: per-region key-value store with last-writer-wins replication
//! - **Region**: health monitoring with hysteresis and the failover controller
//! - **API**: transport-agnostic client read/write and probe handlers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem::cluster::Tandem;
//! use tandem::core::TandemConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tandem = Tandem::start(TandemConfig::default()).unwrap();
//!     let api = tandem.api();
//!     api.write(br#"{"id": "x1", "payload": "v1"}"#).await;
//!     println!("{}", api.read().await.body);
//!     tandem.shutdown().await;
//! }
//! ```

pub mod api;
pub mod cluster;
pub mod core;
pub mod monitoring;
pub mod region;
pub mod store;

pub use cluster::Tandem;
pub use core::error::{Error, Result};
