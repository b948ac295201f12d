//! Downstream publishing: bootstrap replay followed by live streaming.
//!
//! A [`Publisher`] serves one connected downstream peer. It is transport
//! agnostic: anything implementing [`Sink<Transaction>`] will do, which
//! keeps the websocket framing in [`crate::http`] and lets tests drive it
//! with an in-memory channel.
//!
//! # Ordering
//!
//! Replay of the log and registration with the fan-out happen under one
//! read guard of the replica state. The applier commits and delivers under
//! the write guard, so no transaction can land between the end of replay
//! and the start of live delivery, and none is sent twice.

use crate::error::{ReplicationError, Result};
use crate::fanout::FanOut;
use crate::metrics;
use crate::state::ReplicaState;
use crate::transaction::Transaction;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Counters for one publishing session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Transactions sent from the log during bootstrap.
    pub replayed: usize,
    /// Transactions sent from the live channel.
    pub streamed: usize,
}

/// Streams the transaction log, then live commits, to one downstream peer.
pub struct Publisher {
    state: Arc<RwLock<ReplicaState>>,
    fanout: Arc<FanOut>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Publisher {
    pub fn new(
        state: Arc<RwLock<ReplicaState>>,
        fanout: Arc<FanOut>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            state,
            fanout,
            shutdown_rx,
        }
    }

    /// Publish until the sink fails or shutdown is signaled.
    ///
    /// Returns `Ok` on shutdown and [`ReplicationError::PeerConnection`] when
    /// the sink rejects a write. Either way the fan-out channel is
    /// deregistered before returning.
    pub async fn run<S>(mut self, sink: S) -> Result<PublishStats>
    where
        S: Sink<Transaction>,
        S::Error: Display,
    {
        let mut sink = std::pin::pin!(sink);
        let mut stats = PublishStats::default();

        let mut subscription = {
            let state = self.state.read().await;
            for txn in state.log() {
                sink.send(txn.clone()).await.map_err(write_error)?;
                stats.replayed += 1;
            }
            self.fanout.register()
        };
        metrics::record_downstream_txn_sent("replay", stats.replayed);
        info!(
            subscriber = subscription.id(),
            replayed = stats.replayed,
            "Bootstrap replay complete, streaming live"
        );

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        debug!(subscriber = subscription.id(), "Publisher received shutdown signal");
                        break;
                    }
                }

                txn = subscription.recv() => {
                    let Some(txn) = txn else {
                        break;
                    };
                    sink.send(txn).await.map_err(write_error)?;
                    stats.streamed += 1;
                    metrics::record_downstream_txn_sent("live", 1);
                }
            }
        }

        Ok(stats)
    }
}

fn write_error(e: impl Display) -> ReplicationError {
    ReplicationError::peer("downstream", e)
}
