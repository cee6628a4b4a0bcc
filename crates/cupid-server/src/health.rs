//! `/health` and `/presence` response bodies.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub accepts connections, `"shutting_down"` afterwards.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live sessions.
    pub sessions: usize,
    /// Distinct online identities.
    pub users_online: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    sessions: usize,
    users_online: usize,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        users_online,
    }
}

/// Presence lookup response body.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceResponse {
    /// Identity that was looked up.
    pub user_id: String,
    /// Whether the identity has at least one live session.
    pub online: bool,
}
