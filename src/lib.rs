//! # Patch Replica
//!
//! A multi-master replicated JSON document. Every node holds the full
//! document and accepts local edits as JSON Patch documents; edits flow
//! between nodes as sequenced transactions over websockets.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                             patch-replica                              │
//! │                                                                        │
//! │  POST /replace ──┐                                                     │
//! │                  ├──► inbound queue ──► Applier ──► ReplicaState       │
//! │  UpstreamConnector                     (single      (snapshot, log,    │
//! │  (one per peer) ─┘                      writer)      vector clock)     │
//! │                                            │                           │
//! │                                            ▼                           │
//! │                                         FanOut ──► Publisher (per /ws) │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//!
//! A transaction `{source, sequence}` is committed at most once per node:
//! the [`VectorClock`] admits it only if `sequence` is at or past the next
//! expected value for its source. A new downstream connection receives the
//! whole log, then every later commit, with nothing missed or repeated at
//! the boundary.
//!
//! There is no conflict resolution: concurrent edits from different sources
//! are applied in whatever order each node receives them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use patch_replica::{ReplicationConfig, ReplicationEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut engine = ReplicationEngine::new(ReplicationConfig::default());
//!     engine.start().await.expect("Failed to start");
//!
//!     let replica = engine.handle();
//!     replica
//!         .submit_local_edit(r#"[{"op":"add","path":"/x","value":1}]"#)
//!         .await
//!         .expect("queue full");
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod downstream;
pub mod error;
pub mod fanout;
pub mod http;
pub mod metrics;
pub mod state;
pub mod transaction;
pub mod upstream;
pub mod vclock;
pub mod wal;

// Re-exports for convenience
pub use config::{PeerConfig, ReplicationConfig, ReplicationSettings};
pub use coordinator::{EngineState, HealthCheck, ReplicaHandle, ReplicationEngine};
pub use downstream::{PublishStats, Publisher};
pub use error::{ReplicationError, Result};
pub use fanout::{FanOut, Subscription};
pub use state::ReplicaState;
pub use transaction::Transaction;
pub use upstream::{UpstreamConnector, UpstreamManager, UpstreamState};
pub use vclock::VectorClock;
pub use wal::TransactionLog;
