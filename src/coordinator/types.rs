//! Engine state and health types.
//!
//! # State Transitions
//!
//! ```text
//!            start()                shutdown()
//! Created ───────────→ Running ───────────────→ ShuttingDown
//!    │                                               │
//!    │ shutdown()                                    ↓
//!    └─────────────────────────────────────────→ Stopped
//! ```
//!
//! - **Created**: after `ReplicationEngine::new()`. Reads work; nothing is applied yet.
//! - **Running**: applier and upstream connectors are live.
//! - **ShuttingDown**: shutdown signaled, waiting on tasks.
//! - **Stopped**: all tasks joined. Terminal.

use crate::upstream::UpstreamState;

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::ReplicationEngine::start) to begin replication.
    Created,

    /// Applier draining the inbound queue, connectors dialing peers.
    Running,

    /// Shutdown signaled; tasks are finishing.
    ShuttingDown,

    /// Stopped. Cannot be restarted.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Point-in-time view of the replica for diagnostics.
///
/// Collected from in-memory state only; no network I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: EngineState,
    pub source: String,
    /// Committed transactions in the log.
    pub log_len: usize,
    /// Distinct sources present in the vector clock.
    pub vclock_sources: usize,
    /// Registered downstream channels.
    pub subscribers: usize,
    pub upstreams: Vec<UpstreamHealth>,
}

impl HealthCheck {
    /// Upstreams currently streaming.
    pub fn upstreams_streaming(&self) -> usize {
        self.upstreams
            .iter()
            .filter(|u| u.state == UpstreamState::Streaming)
            .count()
    }
}

/// Per-upstream connection health.
#[derive(Debug, Clone)]
pub struct UpstreamHealth {
    pub peer: String,
    pub state: UpstreamState,
    pub attempts: u64,
    /// Consecutive failed sessions.
    pub failure_count: u64,
    pub received: u64,
    /// `u64::MAX` if never connected.
    pub millis_since_success: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::Running.to_string(), "Running");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(EngineState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_upstreams_streaming() {
        let upstream = |state| UpstreamHealth {
            peer: "p".to_string(),
            state,
            attempts: 1,
            failure_count: 0,
            received: 0,
            millis_since_success: 0,
        };
        let health = HealthCheck {
            state: EngineState::Running,
            source: "node-a".to_string(),
            log_len: 0,
            vclock_sources: 0,
            subscribers: 0,
            upstreams: vec![
                upstream(UpstreamState::Streaming),
                upstream(UpstreamState::Connecting),
                upstream(UpstreamState::Streaming),
            ],
        };
        assert_eq!(health.upstreams_streaming(), 2);
    }
}
