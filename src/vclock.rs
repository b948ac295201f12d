//! Per-source sequence tracking.
//!
//! The vector clock maps each source identity to the next sequence number
//! this replica expects from it. Entries are created lazily the first time a
//! source commits. It gates acceptance and detects duplicates; it does not
//! order transactions across sources.
//!
//! # Acceptance
//!
//! A transaction is admitted iff `sequence >= next_expected(source)`. Equal
//! admits the next in-order edit; greater admits an out-of-order edit and
//! skips the gap, which is never backfilled. Lower is a duplicate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from source identity to next expected sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    /// An empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence expected from `source` (0 for an unseen source).
    pub fn next_expected(&self, source: &str) -> u64 {
        self.entries.get(source).copied().unwrap_or(0)
    }

    /// Whether a transaction with this `(source, sequence)` would be accepted.
    pub fn admits(&self, source: &str, sequence: u64) -> bool {
        sequence >= self.next_expected(source)
    }

    /// Record that `(source, sequence)` was committed.
    ///
    /// Never moves an entry backwards.
    pub fn advance(&mut self, source: &str, sequence: u64) {
        let next = sequence.saturating_add(1);
        match self.entries.get_mut(source) {
            Some(entry) => *entry = (*entry).max(next),
            None => {
                self.entries.insert(source.to_string(), next);
            }
        }
    }

    /// Number of sources seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(source, next_expected)` in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Encode as a JSON object for the `/vclock` endpoint.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
