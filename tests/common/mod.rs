//! Shared test utilities for the replication tests.
//!
//! This module provides:
//! - `TestNode`: an engine plus HTTP server on an ephemeral port
//! - JSON Patch builders
//! - Polling helpers for eventually-consistent assertions

#![allow(dead_code)]

use patch_replica::config::{PeerConfig, ReplicationConfig};
use patch_replica::{http, ReplicaHandle, ReplicationEngine};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default wait for replication to settle in tests.
pub const SETTLE: Duration = Duration::from_secs(5);

/// A running replica with its HTTP surface.
pub struct TestNode {
    pub engine: ReplicationEngine,
    pub addr: SocketAddr,
    server_shutdown: watch::Sender<bool>,
    server: JoinHandle<patch_replica::Result<()>>,
}

impl TestNode {
    /// Start a node with no upstreams.
    pub async fn spawn(source: &str) -> Self {
        Self::spawn_on(bind().await, source, &[]).await
    }

    /// Start a node on an already bound listener, replicating from `peers`.
    pub async fn spawn_on(listener: TcpListener, source: &str, peers: &[SocketAddr]) -> Self {
        let mut config = ReplicationConfig::for_testing(source);
        config.listen_addr = listener.local_addr().unwrap();
        config.peers = peers
            .iter()
            .map(|addr| PeerConfig::new(addr.to_string()))
            .collect();

        let mut engine = ReplicationEngine::new(config);
        engine.start().await.unwrap();

        let addr = listener.local_addr().unwrap();
        let app = http::router(engine.handle(), engine.config().settings.max_body_bytes);
        let (server_shutdown, rx) = watch::channel(false);
        let server = tokio::spawn(http::serve(listener, app, rx));

        Self {
            engine,
            addr,
            server_shutdown,
            server,
        }
    }

    pub fn handle(&self) -> ReplicaHandle {
        self.engine.handle()
    }

    /// Websocket URL downstream peers dial.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn stop(mut self) {
        self.engine.shutdown().await;
        let _ = self.server_shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
    }
}

/// Bind an ephemeral localhost listener.
pub async fn bind() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// `[{"op":"add","path":path,"value":value}]`
pub fn add(path: &str, value: Value) -> String {
    json!([{ "op": "add", "path": path, "value": value }]).to_string()
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the handle's log holds at least `len` transactions.
pub async fn wait_for_log_len(handle: &ReplicaHandle, len: usize) {
    let reached = wait_until(SETTLE, || async { handle.log_len().await >= len }).await;
    assert!(reached, "log never reached {len} (at {})", handle.log_len().await);
}
