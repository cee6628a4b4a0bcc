//! Keepalive probing and idle detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use super::connection::{CloseReason, Session};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound activity within the idle timeout; the monitor closed the session.
    TimedOut,
    /// The session closed for another reason.
    Closed,
}

/// Watch one session until it closes.
///
/// Every `interval` the monitor checks inbound activity: once the session has
/// been silent for `idle_timeout` it is closed with
/// [`CloseReason::IdleTimeout`]; otherwise a keepalive probe is requested from
/// the outbound pump. A zero `interval` is treated as one millisecond.
pub async fn run_heartbeat(
    session: Arc<Session>,
    interval: Duration,
    idle_timeout: Duration,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = session.closed() => return HeartbeatResult::Closed,
            _ = ticker.tick() => {
                let idle = session.idle_for();
                if idle >= idle_timeout {
                    info!(idle_ms = idle.as_millis() as u64, "session idle, closing");
                    let _ = session.close(CloseReason::IdleTimeout);
                    return HeartbeatResult::TimedOut;
                }
                debug!("requesting keepalive probe");
                session.request_probe();
            }
        }
    }
}
