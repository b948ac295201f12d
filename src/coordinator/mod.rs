// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The main orchestrator that ties together:
//! - The shared [`ReplicaState`](crate::state::ReplicaState)
//! - The [`Applier`] draining the inbound queue
//! - One [`UpstreamConnector`](crate::upstream::UpstreamConnector) per peer
//! - The [`FanOut`](crate::fanout::FanOut) registry used by downstream publishers
//!
//! # Architecture
//!
//! ```text
//!  local edits ──┐
//!                ├──→ inbound queue ──→ Applier ──→ state ──→ FanOut ──→ publishers
//!  upstreams  ───┘      (bounded)      (single writer)
//! ```
//!
//! Downstream connections are accepted by the HTTP surface, which asks a
//! [`ReplicaHandle`] for a [`Publisher`](crate::downstream::Publisher).

mod applier;
mod handle;
mod types;

pub use applier::{Applier, ApplyOutcome};
pub use handle::ReplicaHandle;
pub use types::{EngineState, HealthCheck, UpstreamHealth};

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::fanout::FanOut;
use crate::metrics;
use crate::state::ReplicaState;
use crate::transaction::Transaction;
use crate::upstream::UpstreamManager;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

/// The main replication engine.
///
/// Owns the background tasks. Reads and local writes go through the
/// [`ReplicaHandle`] returned by [`handle()`](Self::handle), which stays
/// usable for the engine's whole life.
pub struct ReplicationEngine {
    config: ReplicationConfig,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    replica: Arc<RwLock<ReplicaState>>,
    fanout: Arc<FanOut>,

    /// Sender half lives in every handle; the receiver moves into the applier on start.
    inbound_tx: mpsc::Sender<Transaction>,
    inbound_rx: Option<mpsc::Receiver<Transaction>>,

    upstreams: Arc<UpstreamManager>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Applier and connector task handles
    task_handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl ReplicationEngine {
    /// Create a new replication engine.
    ///
    /// The engine starts in `Created` state with an empty document. Call
    /// [`start()`](Self::start) to begin applying and replicating.
    pub fn new(config: ReplicationConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.settings.inbound_queue_capacity.max(1));

        let upstreams = Arc::new(UpstreamManager::new());
        for peer_config in &config.peers {
            upstreams.add_peer(peer_config.clone());
        }

        Self {
            fanout: Arc::new(FanOut::new(config.settings.fanout_capacity)),
            config,
            state_tx,
            state_rx,
            replica: Arc::new(RwLock::new(ReplicaState::new())),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            upstreams,
            shutdown_tx,
            shutdown_rx,
            task_handles: RwLock::new(Vec::new()),
        }
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// This node's source identity.
    pub fn source(&self) -> &str {
        &self.config.source
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Get the upstream manager (for diagnostics).
    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    /// A cloneable handle for reads, local edits and downstream publishers.
    pub fn handle(&self) -> ReplicaHandle {
        ReplicaHandle {
            source: Arc::from(self.config.source.as_str()),
            state: Arc::clone(&self.replica),
            fanout: Arc::clone(&self.fanout),
            inbound: self.inbound_tx.clone(),
            submit_timeout: self.config.settings.submit_timeout_duration(),
            shutdown_rx: self.shutdown_rx.clone(),
        }
    }

    /// Get health status for diagnostics.
    ///
    /// Performs no network I/O.
    pub async fn health(&self) -> HealthCheck {
        let (log_len, vclock_sources) = {
            let replica = self.replica.read().await;
            (replica.log().len(), replica.vclock().len())
        };

        let mut upstreams = Vec::with_capacity(self.upstreams.len());
        for peer in self.upstreams.all() {
            upstreams.push(UpstreamHealth {
                peer: peer.peer().to_string(),
                state: peer.state().await,
                attempts: peer.attempts(),
                failure_count: peer.failure_count(),
                received: peer.received(),
                millis_since_success: peer.millis_since_success(),
            });
        }
        upstreams.sort_by(|a, b| a.peer.cmp(&b.peer));

        HealthCheck {
            state: self.state(),
            source: self.config.source.clone(),
            log_len,
            vclock_sources,
            subscribers: self.fanout.len(),
            upstreams,
        }
    }

    /// Start the replication engine.
    ///
    /// 1. Spawns the applier on the inbound queue
    /// 2. Spawns one connector per configured upstream peer
    ///
    /// Returns immediately; connectors dial in the background.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }
        let inbound_rx = self.inbound_rx.take().ok_or_else(|| ReplicationError::InvalidState {
            expected: "Created".to_string(),
            actual: "inbound queue already taken".to_string(),
        })?;

        info!(
            source = %self.config.source,
            peer_count = self.config.peers.len(),
            "Starting replication engine"
        );

        let mut handles = self.task_handles.write().await;

        let applier = Applier::new(
            Arc::from(self.config.source.as_str()),
            Arc::clone(&self.replica),
            Arc::clone(&self.fanout),
        );
        handles.push(tokio::spawn(applier.run(inbound_rx, self.shutdown_rx.clone())));
        debug!("Spawned applier");

        handles.extend(self.upstreams.spawn_all(
            &self.inbound_tx,
            self.config.settings.reconnect_delay_duration(),
            &self.shutdown_rx,
        ));
        drop(handles);

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!(upstreams = self.upstreams.len(), "Replication engine running");

        Ok(())
    }

    /// Shutdown the replication engine gracefully.
    ///
    /// 1. Signals the applier, connectors and publishers to stop
    /// 2. Waits for spawned tasks (with timeout)
    ///
    /// Committed state stays readable through existing handles.
    pub async fn shutdown(&mut self) {
        info!("Shutting down replication engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.task_handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to complete");
        }

        let drain_timeout = std::time::Duration::from_secs(10);
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Task timed out during shutdown");
                }
            }
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("Replication engine stopped");
    }
}
