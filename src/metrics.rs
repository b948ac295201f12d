//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Applier outcomes (applied, rejected, dropped)
//! - Log growth
//! - Fan-out subscribers and delivery stalls
//! - Upstream connection lifecycle
//! - Local write submissions
//!
//! No exporter is installed by the library; the embedding binary decides.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replica_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a committed transaction. `origin` is `"local"` or `"remote"`.
pub fn record_txn_applied(origin: &'static str) {
    counter!("replica_txn_applied_total", "origin" => origin).increment(1);
}

/// Record a transaction rejected by the vector clock (duplicate or stale).
pub fn record_txn_rejected() {
    counter!("replica_txn_rejected_total").increment(1);
}

/// Record a transaction dropped before the acceptance check.
pub fn record_txn_dropped(reason: &'static str) {
    counter!("replica_txn_dropped_total", "reason" => reason).increment(1);
}

/// Current transaction log length.
pub fn set_log_length(len: usize) {
    gauge!("replica_log_length").set(len as f64);
}

/// Current number of registered downstream channels.
pub fn set_fanout_subscribers(count: usize) {
    gauge!("replica_fanout_subscribers").set(count as f64);
}

/// Record one fan-out delivery and how long the applier waited on it.
pub fn record_fanout_delivery(delivered: usize, blocked: Duration) {
    counter!("replica_fanout_deliveries_total").increment(delivered as u64);
    histogram!("replica_fanout_blocked_seconds").record(blocked.as_secs_f64());
}

/// Record an upstream connection attempt.
pub fn record_upstream_connection(peer: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replica_upstream_connections_total", "peer" => peer.to_string(), "status" => status).increment(1);
}

/// Record upstream connector state.
pub fn set_upstream_state(peer: &str, state: &str) {
    let value = match state {
        "Disconnected" => 0.0,
        "Connecting" => 1.0,
        "Streaming" => 2.0,
        _ => -1.0,
    };
    gauge!("replica_upstream_state", "peer" => peer.to_string()).set(value);
}

/// Record a transaction received from an upstream peer.
pub fn record_upstream_txn_received(peer: &str) {
    counter!("replica_upstream_txn_received_total", "peer" => peer.to_string()).increment(1);
}

/// Record transactions written to one downstream peer.
pub fn record_downstream_txn_sent(phase: &'static str, count: usize) {
    counter!("replica_downstream_txn_sent_total", "phase" => phase).increment(count as u64);
}

/// Record the outcome of a local edit submission.
pub fn record_local_submit(status: &'static str) {
    counter!("replica_local_submit_total", "status" => status).increment(1);
}

/// Set engine state gauge.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("replica_engine_state").set(value);
}
