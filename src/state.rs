// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica state: snapshot, log and vector clock as one unit.
//!
//! The three are always read and written together behind a single lock so
//! that `/get`, `/vclock` and downstream bootstrap observe a consistent
//! triple. The applier is the only writer.
//!
//! Patch computation ([`apply_patch`]) runs against a cloned snapshot
//! outside the lock; only the accept-or-reject decision and the commit
//! ([`ReplicaState::commit`]) happen under the write guard.

use crate::error::{ReplicationError, Result};
use crate::transaction::Transaction;
use crate::vclock::VectorClock;
use crate::wal::TransactionLog;
use serde_json::Value;

/// Materialized document plus the history and clock that produced it.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    snapshot: Value,
    log: TransactionLog,
    vclock: VectorClock,
}

impl Default for ReplicaState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaState {
    /// Empty document `{}`, empty log, empty clock.
    pub fn new() -> Self {
        Self {
            snapshot: Value::Object(serde_json::Map::new()),
            log: TransactionLog::new(),
            vclock: VectorClock::new(),
        }
    }

    pub fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn vclock(&self) -> &VectorClock {
        &self.vclock
    }

    /// Whether `txn` would pass the acceptance check right now.
    ///
    /// Unsequenced transactions are never admitted, and neither is
    /// `u64::MAX`, which would leave the clock unable to advance past it.
    pub fn admits(&self, txn: &Transaction) -> bool {
        txn.sequence.is_some_and(|seq| {
            seq.checked_add(1).is_some() && self.vclock.admits(&txn.source, seq)
        })
    }

    /// Check-and-commit.
    ///
    /// If the transaction is admitted, replaces the snapshot with `candidate`,
    /// appends to the log and advances the clock, returning the committed
    /// transaction. Otherwise returns `None` and leaves state untouched.
    pub fn commit(&mut self, txn: Transaction, candidate: Value) -> Option<Transaction> {
        if !self.admits(&txn) {
            return None;
        }
        let sequence = txn.sequence?;
        self.snapshot = candidate;
        self.vclock.advance(&txn.source, sequence);
        self.log.append(txn.clone());
        Some(txn)
    }
}

/// Compute the document that results from applying `txn`'s payload to `base`.
///
/// Fails with [`ReplicationError::PatchDecode`] if the payload is not a JSON
/// Patch document, or [`ReplicationError::PatchApply`] if an operation cannot
/// be applied (missing path, failed `test`, ...). `base` is never modified.
pub fn apply_patch(base: &Value, txn: &Transaction) -> Result<Value> {
    let sequence = txn.sequence.unwrap_or_default();

    let patch: json_patch::Patch =
        serde_json::from_str(&txn.payload).map_err(|e| ReplicationError::PatchDecode {
            source_id: txn.source.clone(),
            sequence,
            message: e.to_string(),
        })?;

    let mut candidate = base.clone();
    json_patch::patch(&mut candidate, &patch.0).map_err(|e| ReplicationError::PatchApply {
        source_id: txn.source.clone(),
        sequence,
        message: e.to_string(),
    })?;

    Ok(candidate)
}
