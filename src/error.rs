// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replica.
//!
//! Errors are categorized by where they surface: the replication transport,
//! the applier (patch payloads), or the local query/write surface.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `PeerConnection` | Yes | Peer unreachable, socket closed, write failed |
//! | `WireDecode` | Yes | Malformed frame from a peer (connection is recycled) |
//! | `Timeout` | Yes | Inbound queue saturated past the submit bound |
//! | `PatchDecode` | No | Payload is not a JSON Patch document |
//! | `PatchApply` | No | Patch cannot be applied to the current snapshot |
//! | `Serialization` | No | Vector clock or snapshot could not be encoded |
//! | `Config` | No | Configuration missing or invalid |
//! | `Io` | No | Local I/O failure (bind, file read) |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Shutdown` | No | Engine is shutting down |
//!
//! # Retry Behavior
//!
//! Retryable errors are handled by the component that hit them: upstream
//! connectors wait out the reconnect delay and dial again, callers of
//! `submit_local_edit` may resubmit. Non-retryable patch errors drop the single
//! offending transaction and are never re-queued.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating or serving the document.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Peer connection failure.
    ///
    /// Occurs when dialing an upstream fails, or when a peer socket is closed
    /// or errors mid-stream. Upstreams retry after the fixed reconnect delay;
    /// downstream publishers terminate.
    #[error("Peer connection error ({peer}): {message}")]
    PeerConnection { peer: String, message: String },

    /// A frame received from a peer could not be decoded as a transaction.
    #[error("Wire decode error: {0}")]
    WireDecode(String),

    /// Payload is not a valid JSON Patch document.
    #[error("Patch decode error ({source_id}#{sequence}): {message}")]
    PatchDecode {
        source_id: String,
        sequence: u64,
        message: String,
    },

    /// Patch is well-formed but cannot be applied to the current snapshot.
    #[error("Patch apply error ({source_id}#{sequence}): {message}")]
    PatchApply {
        source_id: String,
        sequence: u64,
        message: String,
    },

    /// JSON encoding failure on the query surface.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The inbound queue did not accept a local edit within the bound.
    #[error("Timed out after {0:?} waiting for the inbound queue")]
    Timeout(Duration),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress; the inbound queue is closed.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl ReplicationError {
    /// Create a peer connection error.
    pub fn peer(peer: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::PeerConnection {
            peer: peer.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PeerConnection { .. } => true,
            Self::WireDecode(_) => true, // reconnect replays from the peer's log
            Self::Timeout(_) => true,
            Self::PatchDecode { .. } => false,
            Self::PatchApply { .. } => false,
            Self::Serialization(_) => false,
            Self::Config(_) => false,
            Self::Io(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerConnection { .. } => "peer_connection",
            Self::WireDecode(_) => "wire_decode",
            Self::PatchDecode { .. } => "patch_decode",
            Self::PatchApply { .. } => "patch_apply",
            Self::Serialization(_) => "serialization",
            Self::Timeout(_) => "timeout",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
        }
    }
}
