//! HTTP and websocket surface.
//!
//! | Route       | Method | Response                                         |
//! |-------------|--------|--------------------------------------------------|
//! | `/get`      | GET    | Current document, `text/plain`                   |
//! | `/vclock`   | GET    | Vector clock as a JSON object                    |
//! | `/replace`  | POST   | Body is a JSON Patch; `200` once enqueued        |
//! | `/ws`       | GET    | Websocket upgrade; streams the log, then commits |
//!
//! Write-path failures are plain-text `500`s: `error reading body` when the
//! body cannot be read or is not UTF-8, `timeout` when the inbound queue stays full past the
//! submit timeout.

use crate::coordinator::ReplicaHandle;
use crate::error::{ReplicationError, Result};
use crate::transaction::Transaction;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Path of the replication websocket endpoint, dialed by upstream connectors.
pub const REPLICATION_PATH: &str = "/ws";

#[derive(Clone)]
struct AppState {
    replica: ReplicaHandle,
    max_body_bytes: usize,
}

/// Build the router for one replica.
pub fn router(replica: ReplicaHandle, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/get", get(get_snapshot))
        .route("/vclock", get(get_vclock))
        .route("/replace", post(replace))
        .route(REPLICATION_PATH, get(replicate))
        .with_state(AppState {
            replica,
            max_body_bytes,
        })
}

/// Bind the listener for `host:port`.
///
/// `host` may be a name such as `localhost`; the first address it resolves to
/// that can be bound is used.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

/// Serve `router` on `listener` until `shutdown_rx` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;

    info!("HTTP server stopped");
    Ok(())
}

fn plain_text(status: StatusCode, body: impl Into<Body>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body.into()).into_response()
}

async fn get_snapshot(State(app): State<AppState>) -> Response {
    match app.replica.snapshot_bytes().await {
        Ok(bytes) => plain_text(StatusCode::OK, bytes),
        Err(e) => plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_vclock(State(app): State<AppState>) -> Response {
    match app.replica.vector_clock_json().await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize vector clock");
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn replace(State(app): State<AppState>, body: Body) -> Response {
    let patch = match axum::body::to_bytes(body, app.max_body_bytes).await {
        Ok(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(patch) => patch,
            Err(e) => {
                debug!(error = %e, "Request body is not UTF-8");
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "error reading body");
            }
        },
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "error reading body");
        }
    };

    match app.replica.submit_local_edit(patch).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(ReplicationError::Timeout(_)) => {
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, "timeout")
        }
        Err(e) => plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn replicate(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> Response {
    let span = tracing::info_span!("downstream", %remote);
    ws.on_upgrade(move |socket| serve_downstream(socket, app.replica).instrument(span))
}

/// One downstream peer: publish until either side goes away.
async fn serve_downstream(socket: WebSocket, replica: ReplicaHandle) {
    let (sink, mut incoming) = socket.split();
    let sink = sink.with(|txn: Transaction| async move {
        let frame = txn.encode().map_err(axum::Error::new)?;
        Ok::<_, axum::Error>(Message::Text(frame.into()))
    });

    info!("Downstream peer connected");

    // Downstream peers never send data; reading only surfaces close frames
    // and lets pings be answered.
    let peer_gone = async move {
        while let Some(Ok(message)) = incoming.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    };

    tokio::select! {
        result = replica.publisher().run(sink) => match result {
            Ok(stats) => info!(
                replayed = stats.replayed,
                streamed = stats.streamed,
                "Downstream publisher stopped"
            ),
            Err(e) => info!(error = %e, "Downstream peer disconnected"),
        },
        _ = peer_gone => info!("Downstream peer closed connection"),
    }
}
