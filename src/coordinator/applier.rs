// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The applier: the single writer of replica state.
//!
//! Every transaction, local or remote, passes through one task that drains
//! the inbound queue in arrival order. For each transaction:
//!
//! 1. A local edit with no sequence gets the next sequence for this source
//! 2. The patch is computed against a clone of the current snapshot
//! 3. Under the write lock, the vector clock decides accept or reject
//! 4. On accept, snapshot, log and clock advance together and the
//!    transaction is handed to every downstream channel before the lock
//!    is released
//!
//! Undecodable or unapplicable patches are logged and dropped; they never
//! reach the log and never stop the loop.
//!
//! # Backpressure
//!
//! Step 4 waits on full downstream channels while holding the write lock,
//! so a slow downstream peer stalls commits (and reads) until it drains or
//! disconnects.

use crate::error::ReplicationError;
use crate::fanout::FanOut;
use crate::metrics;
use crate::state::{apply_patch, ReplicaState};
use crate::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, info_span, warn, Instrument};

/// What happened to one transaction.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Committed to the log and delivered to downstream channels.
    Committed(Transaction),
    /// Refused by the vector clock (duplicate or stale).
    Rejected { source: String, sequence: u64 },
    /// Dropped before the acceptance check.
    Dropped(ReplicationError),
}

impl ApplyOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ApplyOutcome::Committed(_))
    }
}

/// Serializing worker over the shared replica state.
pub struct Applier {
    source: Arc<str>,
    state: Arc<RwLock<ReplicaState>>,
    fanout: Arc<FanOut>,
}

impl Applier {
    pub fn new(source: Arc<str>, state: Arc<RwLock<ReplicaState>>, fanout: Arc<FanOut>) -> Self {
        Self {
            source,
            state,
            fanout,
        }
    }

    /// Process one transaction to completion.
    pub async fn apply(&self, mut txn: Transaction) -> ApplyOutcome {
        let local = txn.source == *self.source;

        if txn.sequence.is_none() {
            if !local {
                let err = ReplicationError::WireDecode(format!(
                    "unsequenced transaction from foreign source {}",
                    txn.source
                ));
                warn!(source = %txn.source, "Dropping unsequenced foreign transaction");
                metrics::record_txn_dropped(err.kind());
                return ApplyOutcome::Dropped(err);
            }
            let next = self.state.read().await.vclock().next_expected(&self.source);
            txn.sequence = Some(next);
        }

        let base = self.state.read().await.snapshot().clone();
        let candidate = match apply_patch(&base, &txn) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    source = %txn.source,
                    sequence = ?txn.sequence,
                    error = %e,
                    "Dropping transaction with bad patch"
                );
                metrics::record_txn_dropped(e.kind());
                return ApplyOutcome::Dropped(e);
            }
        };

        let source = txn.source.clone();
        let sequence = txn.sequence.unwrap_or_default();

        let mut state = self.state.write().await;
        match state.commit(txn, candidate) {
            Some(committed) => {
                let log_len = state.log().len();
                let delivered = self.fanout.deliver(&committed).await;
                drop(state);

                metrics::set_log_length(log_len);
                metrics::record_txn_applied(if local { "local" } else { "remote" });
                debug!(
                    source = %source,
                    sequence,
                    log_len,
                    delivered,
                    "Committed transaction"
                );
                ApplyOutcome::Committed(committed)
            }
            None => {
                drop(state);
                metrics::record_txn_rejected();
                debug!(source = %source, sequence, "Rejected stale or duplicate transaction");
                ApplyOutcome::Rejected { source, sequence }
            }
        }
    }

    /// Drain `inbound` until shutdown is signaled or every producer is gone.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Transaction>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let span = info_span!("applier", source = %self.source);

        async move {
            info!("Applier started");

            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Applier received shutdown signal");
                            break;
                        }
                    }

                    txn = inbound.recv() => {
                        match txn {
                            Some(txn) => {
                                self.apply(txn).await;
                            }
                            None => {
                                debug!("Inbound queue closed");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Applier stopped");
        }
        .instrument(span)
        .await
    }
}
