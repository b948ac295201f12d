//! `patch-replica` daemon.
//!
//! Serves one replica on `--host:--port` and replicates from every peer
//! listed in `--config`.

use clap::Parser;
use patch_replica::config::{PeerConfig, ReplicationConfig};
use patch_replica::{http, ReplicationEngine};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "patch-replica", version, about = "Replicated JSON document over JSON Patch")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Peer file: one upstream `host:port` per line
    #[arg(long, default_value = "replication.txt")]
    config: PathBuf,

    /// Source identity of this node (random if omitted)
    #[arg(long)]
    source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("patch_replica=info")),
        )
        .init();

    let args = Args::parse();

    let listener = http::bind(&args.host, args.port).await?;
    let listen_addr = listener.local_addr()?;
    let source = args
        .source
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let peers = match PeerConfig::load_peer_file(&args.config) {
        Ok(peers) => peers,
        Err(e) => {
            warn!(error = %e, "No peers loaded, running standalone");
            Vec::new()
        }
    };
    for peer in &peers {
        info!(peer = %peer.addr, "Configured upstream");
    }

    let config = ReplicationConfig {
        source,
        listen_addr,
        peers,
        ..Default::default()
    };
    info!(source = %config.source, %listen_addr, "Starting replica");

    let mut engine = ReplicationEngine::new(config);
    engine.start().await?;

    let app = http::router(engine.handle(), engine.config().settings.max_body_bytes);
    let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(http::serve(listener, app, server_shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");

    // Engine first so open downstream streams end and the server can drain.
    engine.shutdown().await;
    let _ = server_shutdown_tx.send(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    Ok(())
}
