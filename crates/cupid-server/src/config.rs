//! Server and hub configuration.

use std::time::Duration;

use cupid_core::constants::{
    COALESCE_MAX_FRAMES, IDLE_TIMEOUT, KEEPALIVE_INTERVAL, MAILBOX_CAPACITY, MAX_MESSAGE_BYTES,
    WRITE_TIMEOUT,
};
use cupid_settings::{CupidSettings, HubSettings};

/// Limits and timers applied to every session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound mailbox capacity per session, in frames.
    pub mailbox_capacity: usize,
    /// Largest inbound message in bytes.
    pub max_message_bytes: usize,
    /// Inbound silence after which a session is presumed dead.
    pub idle_timeout: Duration,
    /// Deadline for one transport write.
    pub write_timeout: Duration,
    /// Interval between keepalive probes.
    pub keepalive_interval: Duration,
    /// Maximum frames joined into one transport write.
    pub coalesce_max_frames: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: MAILBOX_CAPACITY,
            max_message_bytes: MAX_MESSAGE_BYTES,
            idle_timeout: IDLE_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            coalesce_max_frames: COALESCE_MAX_FRAMES,
        }
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(settings: &HubSettings) -> Self {
        Self {
            mailbox_capacity: settings.mailbox_capacity.max(1),
            max_message_bytes: settings.max_message_bytes,
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            keepalive_interval: Duration::from_millis(settings.keepalive_interval_ms.max(1)),
            coalesce_max_frames: settings.coalesce_max_frames.max(1),
        }
    }
}

/// Configuration for the HTTP listener.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_timeout: Duration,
    /// Per-session limits.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_timeout: Duration::from_secs(15),
            hub: HubConfig::default(),
        }
    }
}

impl From<&CupidSettings> for ServerConfig {
    fn from(settings: &CupidSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            hub: HubConfig::from(&settings.hub),
        }
    }
}
