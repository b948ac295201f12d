//! In-memory transaction log.
//!
//! Append-only history of every committed transaction, in commit order. It is
//! never truncated while the process runs and is replayed verbatim to each
//! newly connected downstream replica. Nothing is persisted across restarts.

use crate::transaction::Transaction;

/// Ordered history of committed transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    entries: Vec<Transaction>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a committed transaction.
    pub fn append(&mut self, txn: Transaction) {
        self.entries.push(txn);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in commit order.
    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.entries.iter()
    }

    /// Committed sequence numbers for one source, in log order.
    pub fn sequences_for<'a>(&'a self, source: &'a str) -> impl Iterator<Item = u64> + 'a {
        self.entries
            .iter()
            .filter(move |t| t.source == source)
            .filter_map(|t| t.sequence)
    }

    /// The most recently committed transaction.
    pub fn last(&self) -> Option<&Transaction> {
        self.entries.last()
    }
}

impl<'a> IntoIterator for &'a TransactionLog {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut log = TransactionLog::new();
        log.append(Transaction::sequenced("node-a", 0, "[]"));
        log.append(Transaction::sequenced("node-b", 0, "[]"));
        log.append(Transaction::sequenced("node-a", 1, "[]"));

        let order: Vec<_> = log
            .iter()
            .map(|t| (t.source.as_str(), t.sequence))
            .collect();
        assert_eq!(
            order,
            vec![("node-a", Some(0)), ("node-b", Some(0)), ("node-a", Some(1))]
        );
        assert_eq!(log.len(), 3);
        assert_eq!(log.last().unwrap().sequence, Some(1));
    }

    #[test]
    fn test_sequences_for_source() {
        let mut log = TransactionLog::new();
        log.append(Transaction::sequenced("node-a", 0, "[]"));
        log.append(Transaction::sequenced("node-b", 0, "[]"));
        log.append(Transaction::sequenced("node-a", 1, "[]"));

        assert_eq!(log.sequences_for("node-a").collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(log.sequences_for("node-b").collect::<Vec<_>>(), vec![0]);
        assert_eq!(log.sequences_for("node-c").count(), 0);
    }

    #[test]
    fn test_empty() {
        let log = TransactionLog::new();
        assert!(log.is_empty());
        assert!(log.last().is_none());
        assert_eq!((&log).into_iter().count(), 0);
    }
}
