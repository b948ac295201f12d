//! Configuration for the replica.
//!
//! Configuration is passed to
//! [`ReplicationEngine::new()`](crate::ReplicationEngine::new) and can be
//! built programmatically, deserialized from JSON, or assembled by the binary
//! from CLI flags plus the line-oriented peer file.
//!
//! # Quick Start
//!
//! ```rust
//! use patch_replica::config::{ReplicationConfig, PeerConfig};
//!
//! let config = ReplicationConfig {
//!     source: "node-1".into(),
//!     peers: vec![PeerConfig::new("10.0.0.2:8080")],
//!     ..Default::default()
//! };
//! assert_eq!(config.peers[0].url(), "ws://10.0.0.2:8080/ws");
//! ```
//!
//! # Peer File
//!
//! One peer address per line, read once at startup:
//!
//! ```text
//! # upstreams for node-1
//! 10.0.0.2:8080
//! 10.0.0.3:8080
//! ```

use crate::error::{ReplicationError, Result};
use crate::fanout::DEFAULT_FANOUT_CAPACITY;
use crate::http::REPLICATION_PATH;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Identity of this node as the origin of transactions.
    /// The binary generates a random UUID when none is given; it is not
    /// persisted, so a restart without a fixed identity starts a new source.
    pub source: String,

    /// Address the HTTP/websocket surface binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upstream peers to dial and consume from.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Tunables for queues and timers.
    #[serde(default)]
    pub settings: ReplicationSettings,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 80))
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            source: "local.dev.node.default".to_string(),
            listen_addr: default_listen_addr(),
            peers: Vec::new(),
            settings: ReplicationSettings::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing: ephemeral port, fast reconnects.
    pub fn for_testing(source: &str) -> Self {
        Self {
            source: source.to_string(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            peers: Vec::new(),
            settings: ReplicationSettings::testing(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue capacities and timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Capacity of the inbound queue feeding the applier.
    /// Producers (local writes, upstream connectors) wait when it is full.
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// Capacity of each downstream connection's channel.
    #[serde(default = "default_fanout_capacity")]
    pub fanout_capacity: usize,

    /// Fixed delay between upstream connection attempts (e.g. "10s").
    #[serde(default = "default_ten_seconds")]
    pub reconnect_delay: String,

    /// How long a local edit may wait for space in the inbound queue.
    #[serde(default = "default_ten_seconds")]
    pub submit_timeout: String,

    /// Maximum accepted request body size for local edits, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_inbound_queue_capacity() -> usize {
    256
}

fn default_fanout_capacity() -> usize {
    DEFAULT_FANOUT_CAPACITY
}

fn default_ten_seconds() -> String {
    "10s".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: 256,
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
            reconnect_delay: "10s".to_string(),
            submit_timeout: "10s".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ReplicationSettings {
    /// Fast timers for tests.
    pub fn testing() -> Self {
        Self {
            reconnect_delay: "100ms".to_string(),
            submit_timeout: "1s".to_string(),
            ..Self::default()
        }
    }

    /// Parse `reconnect_delay`, falling back to 10 seconds.
    pub fn reconnect_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.reconnect_delay).unwrap_or(Duration::from_secs(10))
    }

    /// Parse `submit_timeout`, falling back to 10 seconds.
    pub fn submit_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.submit_timeout).unwrap_or(Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PeerConfig: one entry per upstream
// ═══════════════════════════════════════════════════════════════════════════════

/// An upstream peer to replicate from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Network address of the peer's HTTP surface, `host:port`.
    pub addr: String,
}

impl PeerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Websocket URL of the peer's replication endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.addr, REPLICATION_PATH)
    }

    /// Parse the line-oriented peer list.
    ///
    /// Lines are trimmed; blank lines and `#` comments are skipped.
    pub fn parse_peer_list(contents: &str) -> Vec<PeerConfig> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(PeerConfig::new)
            .collect()
    }

    /// Read and parse a peer file.
    ///
    /// A missing or unreadable file is a [`ReplicationError::Config`]; callers
    /// typically log it and start with no upstreams.
    pub fn load_peer_file(path: impl AsRef<Path>) -> Result<Vec<PeerConfig>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("cannot read peer file {}: {}", path.display(), e))
        })?;
        Ok(Self::parse_peer_list(&contents))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
