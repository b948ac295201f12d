//! Upstream peer connections.
//!
//! One [`UpstreamConnector`] per configured peer address. Each dials the
//! peer's replication endpoint, receives one transaction per websocket
//! message and pushes it onto the shared inbound queue. Connectors are
//! independent and run concurrently.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Streaming
//!      ↑             │            │
//!      └── (10s) ────┴────────────┘
//! ```
//!
//! The first attempt is made immediately. Every later attempt waits a fixed
//! `reconnect_delay`; there is no exponential backoff and no retry limit.
//!
//! # Backpressure
//!
//! Pushing onto the inbound queue waits while the applier is behind, which
//! stops this connector reading from its socket. That is the only flow
//! control between replicas.

use crate::config::PeerConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::transaction::Transaction;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn, Instrument};

/// State of an upstream connector.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// Not connected; waiting out the reconnect delay (or not started).
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Connected and receiving transactions.
    Streaming,
}

impl std::fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamState::Disconnected => write!(f, "Disconnected"),
            UpstreamState::Connecting => write!(f, "Connecting"),
            UpstreamState::Streaming => write!(f, "Streaming"),
        }
    }
}

/// A reconnecting client for one upstream peer.
pub struct UpstreamConnector {
    /// Peer configuration
    pub config: PeerConfig,
    /// Current state
    state: RwLock<UpstreamState>,
    /// Total connection attempts
    attempts: AtomicU64,
    /// Consecutive failed sessions (reset on successful connect)
    failure_count: AtomicU64,
    /// Transactions received over the connector's lifetime
    received: AtomicU64,
    /// Last successful connect or receive (epoch millis)
    last_success: AtomicU64,
}

impl UpstreamConnector {
    /// Create a connector (not yet running).
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(UpstreamState::Disconnected),
            attempts: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            received: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
        }
    }

    /// Peer address as configured.
    pub fn peer(&self) -> &str {
        &self.config.addr
    }

    /// Get current connection state.
    pub async fn state(&self) -> UpstreamState {
        *self.state.read().await
    }

    pub async fn is_streaming(&self) -> bool {
        self.state().await == UpstreamState::Streaming
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Acquire)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Milliseconds since the last successful connect or receive.
    pub fn millis_since_success(&self) -> u64 {
        let last = self.last_success.load(Ordering::Acquire);
        if last == 0 {
            return u64::MAX;
        }
        epoch_millis().saturating_sub(last)
    }

    async fn set_state(&self, state: UpstreamState) {
        *self.state.write().await = state;
        metrics::set_upstream_state(&self.config.addr, &state.to_string());
    }

    /// Run the connect/stream/reconnect loop until shutdown is signaled.
    pub async fn run(
        self: Arc<Self>,
        inbound: mpsc::Sender<Transaction>,
        reconnect_delay: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let span = tracing::info_span!("upstream", peer = %self.config.addr);

        async move {
            info!(url = %self.config.url(), "Starting upstream connector");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.stream_once(&inbound, &mut shutdown_rx).await {
                    Ok(()) | Err(ReplicationError::Shutdown) => break,
                    Err(e) => {
                        self.failure_count.fetch_add(1, Ordering::AcqRel);
                        warn!(
                            error = %e,
                            retry_in_ms = reconnect_delay.as_millis() as u64,
                            "Upstream session ended"
                        );
                    }
                }

                self.set_state(UpstreamState::Disconnected).await;

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }

            self.set_state(UpstreamState::Disconnected).await;
            info!("Upstream connector stopped");
        }
        .instrument(span)
        .await
    }

    /// One `Connecting → Streaming → Disconnected` pass.
    ///
    /// Returns `Ok` only when shutdown ends the session.
    async fn stream_once(
        &self,
        inbound: &mpsc::Sender<Transaction>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        self.set_state(UpstreamState::Connecting).await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        debug!("Trying to connect to upstream");

        let url = self.config.url();
        let (mut ws, _response) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                metrics::record_upstream_connection(&self.config.addr, false);
                return Err(ReplicationError::peer(&self.config.addr, e));
            }
        };

        metrics::record_upstream_connection(&self.config.addr, true);
        self.failure_count.store(0, Ordering::Release);
        self.last_success.store(epoch_millis(), Ordering::Release);
        self.set_state(UpstreamState::Streaming).await;
        info!("Connected to upstream");

        loop {
            let message = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                    continue;
                }

                message = ws.next() => message,
            };

            let frame = match message {
                Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                Some(Ok(Message::Close(frame))) => {
                    return Err(ReplicationError::peer(
                        &self.config.addr,
                        format!("closed by peer ({:?})", frame.map(|f| f.code)),
                    ));
                }
                Some(Ok(_)) => continue, // ping/pong handled by tungstenite
                Some(Err(e)) => return Err(ReplicationError::peer(&self.config.addr, e)),
                None => {
                    return Err(ReplicationError::peer(&self.config.addr, "stream ended"));
                }
            };

            let txn = Transaction::decode(&frame)?;
            debug!(
                source = %txn.source,
                sequence = ?txn.sequence,
                "Received transaction from upstream"
            );
            self.received.fetch_add(1, Ordering::AcqRel);
            self.last_success.store(epoch_millis(), Ordering::Release);
            metrics::record_upstream_txn_received(&self.config.addr);

            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }

                sent = inbound.send(txn) => {
                    sent.map_err(|_| ReplicationError::Shutdown)?;
                }
            }
        }
    }
}

/// Manager for all upstream connectors.
pub struct UpstreamManager {
    /// All connectors (keyed by peer address)
    peers: dashmap::DashMap<String, Arc<UpstreamConnector>>,
}

impl Default for UpstreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamManager {
    pub fn new() -> Self {
        Self {
            peers: dashmap::DashMap::new(),
        }
    }

    /// Add a peer from configuration. Duplicate addresses are ignored.
    pub fn add_peer(&self, config: PeerConfig) {
        let addr = config.addr.clone();
        self.peers
            .entry(addr)
            .or_insert_with(|| Arc::new(UpstreamConnector::new(config)));
    }

    /// Get a connector by peer address.
    pub fn get(&self, addr: &str) -> Option<Arc<UpstreamConnector>> {
        self.peers.get(addr).map(|r| r.value().clone())
    }

    /// Get all connectors.
    pub fn all(&self) -> Vec<Arc<UpstreamConnector>> {
        self.peers.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Spawn one task per connector.
    pub fn spawn_all(
        &self,
        inbound: &mpsc::Sender<Transaction>,
        reconnect_delay: Duration,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        self.all()
            .into_iter()
            .map(|connector| {
                let inbound = inbound.clone();
                let shutdown_rx = shutdown_rx.clone();
                info!(peer = %connector.peer(), "Spawned upstream connector");
                tokio::spawn(connector.run(inbound, reconnect_delay, shutdown_rx))
            })
            .collect()
    }

    /// Count of connectors currently streaming.
    pub async fn streaming_count(&self) -> usize {
        let mut count = 0;
        for peer in self.all() {
            if peer.is_streaming().await {
                count += 1;
            }
        }
        count
    }
}

/// Get current epoch milliseconds.
fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;

    #[tokio::test]
    async fn test_connector_initial_state() {
        let conn = UpstreamConnector::new(PeerConfig::new("127.0.0.1:1"));
        assert_eq!(conn.peer(), "127.0.0.1:1");
        assert_eq!(conn.state().await, UpstreamState::Disconnected);
        assert!(!conn.is_streaming().await);
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.failure_count(), 0);
        assert_eq!(conn.millis_since_success(), u64::MAX);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(UpstreamState::Disconnected.to_string(), "Disconnected");
        assert_eq!(UpstreamState::Connecting.to_string(), "Connecting");
        assert_eq!(UpstreamState::Streaming.to_string(), "Streaming");
    }

    #[tokio::test]
    async fn test_unreachable_peer_retries_with_fixed_delay() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let conn = Arc::new(UpstreamConnector::new(PeerConfig::new(addr.to_string())));
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&conn).run(tx, Duration::from_millis(50), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(conn.attempts() >= 2, "expected retries, got {}", conn.attempts());
        assert!(conn.failure_count() >= 2);
        assert_ne!(conn.state().await, UpstreamState::Streaming);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connector should stop on shutdown")
            .unwrap();
        assert_eq!(conn.state().await, UpstreamState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_during_delay() {
        let conn = Arc::new(UpstreamConnector::new(PeerConfig::new("127.0.0.1:1")));
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&conn).run(tx, Duration::from_secs(3600), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connector should not wait out the reconnect delay")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_streaming_is_not_a_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = Transaction::sequenced("node-b", 0, "[]").encode().unwrap();
            ws.send(Message::Text(frame.into())).await.unwrap();
            // Hold the connection open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = Arc::new(UpstreamConnector::new(PeerConfig::new(addr.to_string())));
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&conn).run(tx, Duration::from_secs(3600), shutdown_rx));

        let txn = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("transaction should arrive")
            .unwrap();
        assert_eq!(txn.sequence, Some(0));
        assert_eq!(conn.state().await, UpstreamState::Streaming);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connector should stop on shutdown")
            .unwrap();

        assert_eq!(conn.attempts(), 1);
        assert_eq!(conn.failure_count(), 0);
        assert_eq!(conn.received(), 1);
        assert_eq!(conn.state().await, UpstreamState::Disconnected);
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server should see the close")
            .unwrap();
    }

    #[test]
    fn test_manager_add_and_get() {
        let manager = UpstreamManager::new();
        manager.add_peer(PeerConfig::new("peer-1:80"));
        manager.add_peer(PeerConfig::new("peer-2:80"));
        manager.add_peer(PeerConfig::new("peer-1:80"));

        assert_eq!(manager.len(), 2);
        assert!(manager.get("peer-1:80").is_some());
        assert!(manager.get("peer-3:80").is_none());
    }

    #[tokio::test]
    async fn test_manager_streaming_count_none() {
        let manager = UpstreamManager::new();
        manager.add_peer(PeerConfig::new("peer-1:80"));
        assert_eq!(manager.streaming_count().await, 0);
    }

    #[test]
    fn test_epoch_millis() {
        let millis = epoch_millis();
        assert!(millis > 1577836800000); // Jan 1, 2020
        assert!(millis < 4102444800000); // Jan 1, 2100
    }
}
