//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Sessions opened (counter).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Sessions closed (counter, labels: reason).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Registered sessions (gauge).
pub const HUB_SESSIONS_ACTIVE: &str = "hub_sessions_active";
/// Distinct online identities (gauge).
pub const HUB_USERS_ONLINE: &str = "hub_users_online";
/// Frames queued on session mailboxes (counter).
pub const HUB_FRAMES_ENQUEUED_TOTAL: &str = "hub_frames_enqueued_total";
/// Sessions evicted for a full mailbox (counter).
pub const HUB_SLOW_CONSUMER_EVICTIONS_TOTAL: &str = "hub_slow_consumer_evictions_total";
/// Fan-outs addressed to an identity with no live session (counter).
pub const HUB_ENVELOPES_UNDELIVERABLE_TOTAL: &str = "hub_envelopes_undeliverable_total";
/// Session lifetime in seconds (histogram).
pub const HUB_SESSION_DURATION_SECONDS: &str = "hub_session_duration_seconds";
