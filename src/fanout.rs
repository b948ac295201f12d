//! Fan-out registry for downstream replicas.
//!
//! Every connected downstream publisher owns one bounded channel registered
//! here. The applier delivers each committed transaction to every registered
//! channel, in commit order, and waits on a full channel (one slow peer
//! stalls commits system-wide until it drains or disconnects).
//!
//! # Lock Ordering
//!
//! The registry lock is always taken *after* the replica state lock by any
//! path that holds both, and is never held across an `.await`. The applier
//! snapshots the subscriber list while holding the state write guard, so a
//! publisher registering under the state read guard is either fully in or
//! fully out of any given delivery.
//!
//! # Deregistration
//!
//! A [`Subscription`] removes itself from the registry when dropped. A
//! delivery that finds its receiver gone also prunes the entry.

use crate::metrics;
use crate::transaction::Transaction;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Identifier of one registered downstream channel.
pub type SubscriberId = u64;

/// Default per-connection channel capacity.
pub const DEFAULT_FANOUT_CAPACITY: usize = 239;

/// Registry of downstream channels.
#[derive(Debug)]
pub struct FanOut {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::Sender<Transaction>>>,
}

impl FanOut {
    /// Create a registry whose channels hold `capacity` transactions.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, mpsc::Sender<Transaction>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new downstream channel.
    ///
    /// Callers must hold the replica state lock (read or write) so the
    /// registration is ordered against commits.
    pub fn register(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let count = {
            let mut subs = self.lock();
            subs.insert(id, tx);
            subs.len()
        };
        metrics::set_fanout_subscribers(count);
        debug!(subscriber = id, subscribers = count, "Registered downstream channel");

        Subscription {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Remove a channel. Returns whether it was registered.
    pub fn deregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subs = self.lock();
            let removed = subs.remove(&id).is_some();
            (removed, subs.len())
        };
        if removed {
            metrics::set_fanout_subscribers(count);
            debug!(subscriber = id, subscribers = count, "Deregistered downstream channel");
        }
        removed
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver `txn` to every registered channel, waiting on full ones.
    ///
    /// Channels whose receiver has gone away are pruned. Returns the number
    /// of channels the transaction was handed to.
    pub async fn deliver(&self, txn: &Transaction) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<Transaction>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let start = Instant::now();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.send(txn.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => closed.push(id),
            }
        }
        metrics::record_fanout_delivery(delivered, start.elapsed());

        for id in closed {
            if self.deregister(id) {
                debug!(subscriber = id, "Pruned closed downstream channel");
            }
        }
        delivered
    }
}

/// A registered downstream channel. Deregisters on drop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Transaction>,
    registry: Arc<FanOut>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next transaction committed after registration, in commit order.
    ///
    /// Returns `None` once the channel has been deregistered and drained.
    pub async fn recv(&mut self) -> Option<Transaction> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
