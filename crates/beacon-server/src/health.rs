//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Producers currently online.
    pub online_producers: usize,
    /// Active monitoring sessions.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
#[must_use]
pub fn health_check(
    start_time: Instant,
    connections: usize,
    online_producers: usize,
    active_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        online_producers,
        active_sessions,
    }
}
