//! Transactions: the unit of replication.
//!
//! A transaction is a `(source, sequence, payload)` triple. The origin node
//! submits it with the sequence unassigned; the applier stamps the next number
//! for that source before committing. Once committed a transaction is never
//! modified again.
//!
//! # Wire Format
//!
//! One JSON object per websocket message, no batching:
//!
//! ```json
//! {"source":"6f0c...","sequence":4,"payload":"[{\"op\":\"add\",\"path\":\"/x\",\"value\":1}]"}
//! ```
//!
//! `payload` is the JSON Patch document carried as a string, exactly as the
//! origin received it.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};

/// An edit to the replicated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identity of the node where the edit originated.
    pub source: String,
    /// Per-source sequence number. `None` until the origin's applier assigns it.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Serialized JSON Patch document.
    pub payload: String,
}

impl Transaction {
    /// A locally originated edit, not yet sequenced.
    pub fn local(source: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sequence: None,
            payload: payload.into(),
        }
    }

    /// A transaction with an assigned sequence number.
    pub fn sequenced(source: impl Into<String>, sequence: u64, payload: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sequence: Some(sequence),
            payload: payload.into(),
        }
    }

    /// Whether the applier has stamped a sequence number.
    pub fn is_assigned(&self) -> bool {
        self.sequence.is_some()
    }

    /// Encode for the wire. Only assigned transactions are ever sent.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame received from a peer.
    ///
    /// Peers only forward committed transactions, so a missing sequence is a
    /// protocol violation. `u64::MAX` is refused too: no clock entry can move
    /// past it.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let txn: Transaction = serde_json::from_slice(frame)
            .map_err(|e| ReplicationError::WireDecode(e.to_string()))?;
        match txn.sequence {
            None => Err(ReplicationError::WireDecode(format!(
                "transaction from {} has no sequence",
                txn.source
            ))),
            Some(u64::MAX) => Err(ReplicationError::WireDecode(format!(
                "transaction from {} has out-of-range sequence",
                txn.source
            ))),
            Some(_) => Ok(txn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_is_unassigned() {
        let txn = Transaction::local("node-a", "[]");
        assert!(!txn.is_assigned());
        assert_eq!(txn.source, "node-a");
    }

    #[test]
    fn test_wire_field_names() {
        let txn = Transaction::sequenced("node-a", 7, r#"[{"op":"remove","path":"/y"}]"#);
        let frame = txn.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["source"], "node-a");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["payload"], r#"[{"op":"remove","path":"/y"}]"#);
    }

    #[test]
    fn test_decode_accepts_peer_frame() {
        let frame = br#"{"source":"node-b","sequence":0,"payload":"[]"}"#;
        let txn = Transaction::decode(frame).unwrap();
        assert_eq!(txn, Transaction::sequenced("node-b", 0, "[]"));
    }

    #[test]
    fn test_decode_rejects_unassigned() {
        let frame = br#"{"source":"node-b","payload":"[]"}"#;
        let err = Transaction::decode(frame).unwrap_err();
        assert!(matches!(err, ReplicationError::WireDecode(_)));

        let frame = br#"{"source":"node-b","sequence":null,"payload":"[]"}"#;
        assert!(Transaction::decode(frame).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for frame in [&b""[..], b"{", b"[]", br#"{"source":1,"sequence":0,"payload":"[]"}"#] {
            let err = Transaction::decode(frame).unwrap_err();
            assert_eq!(err.kind(), "wire_decode");
        }
    }

    #[test]
    fn test_decode_rejects_max_sequence() {
        let frame = br#"{"source":"node-b","sequence":18446744073709551615,"payload":"[]"}"#;
        let err = Transaction::decode(frame).unwrap_err();
        assert_eq!(err.kind(), "wire_decode");

        let frame = br#"{"source":"node-b","sequence":18446744073709551614,"payload":"[]"}"#;
        let txn = Transaction::decode(frame).unwrap();
        assert_eq!(txn.sequence, Some(u64::MAX - 1));
    }

    #[test]
    fn test_decode_rejects_negative_sequence() {
        let frame = br#"{"source":"node-b","sequence":-1,"payload":"[]"}"#;
        assert!(Transaction::decode(frame).is_err());
    }
}
