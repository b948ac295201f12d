//! Cloneable access to a running replica.
//!
//! [`ReplicaHandle`] is what the HTTP surface (and tests) hold. Reads take
//! the state read lock; writes only ever go through the inbound queue so
//! the applier stays the single writer.

use crate::downstream::Publisher;
use crate::error::{ReplicationError, Result};
use crate::fanout::FanOut;
use crate::metrics;
use crate::state::ReplicaState;
use crate::transaction::Transaction;
use crate::vclock::VectorClock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ReplicaHandle {
    pub(super) source: Arc<str>,
    pub(super) state: Arc<RwLock<ReplicaState>>,
    pub(super) fanout: Arc<FanOut>,
    pub(super) inbound: mpsc::Sender<Transaction>,
    pub(super) submit_timeout: Duration,
    pub(super) shutdown_rx: watch::Receiver<bool>,
}

impl ReplicaHandle {
    /// This node's source identity.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current document.
    pub async fn read_snapshot(&self) -> Value {
        self.state.read().await.snapshot().clone()
    }

    /// Current document serialized as JSON.
    pub async fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        Ok(serde_json::to_vec(state.snapshot())?)
    }

    pub async fn read_vector_clock(&self) -> VectorClock {
        self.state.read().await.vclock().clone()
    }

    /// Vector clock serialized as a JSON object of source to next sequence.
    pub async fn vector_clock_json(&self) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        Ok(state.vclock().to_json()?)
    }

    /// Every committed transaction, in commit order.
    pub async fn log_entries(&self) -> Vec<Transaction> {
        self.state.read().await.log().iter().cloned().collect()
    }

    pub async fn log_len(&self) -> usize {
        self.state.read().await.log().len()
    }

    /// Registered downstream channels.
    pub fn subscriber_count(&self) -> usize {
        self.fanout.len()
    }

    /// Queue a local edit for the applier.
    ///
    /// Returns once the edit is enqueued, not once it is applied. Waits at
    /// most the configured submit timeout for queue space; an invalid patch
    /// is still accepted here and dropped later by the applier.
    pub async fn submit_local_edit(&self, patch: impl Into<String>) -> Result<()> {
        let txn = Transaction::local(self.source.as_ref(), patch);

        match tokio::time::timeout(self.submit_timeout, self.inbound.send(txn)).await {
            Ok(Ok(())) => {
                metrics::record_local_submit("enqueued");
                debug!("Local edit enqueued");
                Ok(())
            }
            Ok(Err(_)) => {
                metrics::record_local_submit("closed");
                Err(ReplicationError::Shutdown)
            }
            Err(_) => {
                metrics::record_local_submit("timeout");
                warn!(
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Inbound queue full, local edit timed out"
                );
                Err(ReplicationError::Timeout(self.submit_timeout))
            }
        }
    }

    /// Queue a transaction as if it had arrived from an upstream peer.
    pub async fn enqueue(&self, txn: Transaction) -> Result<()> {
        self.inbound
            .send(txn)
            .await
            .map_err(|_| ReplicationError::Shutdown)
    }

    /// A publisher for one new downstream connection.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.state),
            Arc::clone(&self.fanout),
            self.shutdown_rx.clone(),
        )
    }

    /// Resolves once engine shutdown has been signaled.
    pub async fn shutdown_signal(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaHandle")
            .field("source", &self.source)
            .field("submit_timeout", &self.submit_timeout)
            .finish_non_exhaustive()
    }
}
