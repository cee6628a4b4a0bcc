//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a settings file may specify any
//! subset of fields; missing ones keep their compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CupidSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Connection hub limits and timers.
    pub hub: HubSettings,
    /// Credential verification settings.
    pub auth: AuthSettings,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

impl CupidSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        let hub = &self.hub;
        if hub.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.mailboxCapacity must be at least 1".into(),
            ));
        }
        if hub.coalesce_max_frames == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.coalesceMaxFrames must be at least 1".into(),
            ));
        }
        if hub.max_message_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.maxMessageBytes must be at least 1".into(),
            ));
        }
        if hub.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.writeTimeoutMs must be at least 1".into(),
            ));
        }
        if hub.keepalive_interval_ms == 0 || hub.keepalive_interval_ms >= hub.idle_timeout_ms {
            return Err(SettingsError::InvalidValue(format!(
                "hub.keepaliveIntervalMs ({}) must be positive and shorter than hub.idleTimeoutMs ({})",
                hub.keepalive_interval_ms, hub.idle_timeout_ms
            )));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// Seconds to wait for in-flight connections on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            shutdown_timeout_secs: 15,
        }
    }
}

/// Connection hub limits and timers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Outbound mailbox capacity per session, in frames.
    pub mailbox_capacity: usize,
    /// Largest inbound message in bytes.
    pub max_message_bytes: usize,
    /// Inbound silence (ms) after which a session is presumed dead.
    pub idle_timeout_ms: u64,
    /// Deadline (ms) for one transport write.
    pub write_timeout_ms: u64,
    /// Interval (ms) between keepalive probes.
    pub keepalive_interval_ms: u64,
    /// Maximum frames joined into one transport write.
    pub coalesce_max_frames: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            max_message_bytes: 512 * 1024,
            idle_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            keepalive_interval_ms: 30_000,
            coalesce_max_frames: 32,
        }
    }
}

/// Credential verification settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret used to verify session tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,
    /// Expected `aud` claim, if any. Unset means `aud` is not checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_audience: Option<String>,
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_hub_limits() {
        let settings = CupidSettings::default();
        assert_eq!(settings.hub.mailbox_capacity, 256);
        assert_eq!(settings.hub.max_message_bytes, 524_288);
        assert_eq!(settings.hub.idle_timeout_ms, 60_000);
        assert_eq!(settings.hub.write_timeout_ms, 10_000);
        assert_eq!(settings.hub.keepalive_interval_ms, 30_000);
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.auth.jwt_secret.is_none());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(CupidSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_mailbox_is_invalid() {
        let mut settings = CupidSettings::default();
        settings.hub.mailbox_capacity = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("mailboxCapacity"));
    }

    #[test]
    fn keepalive_must_be_shorter_than_idle_timeout() {
        let mut settings = CupidSettings::default();
        settings.hub.keepalive_interval_ms = 60_000;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("keepaliveIntervalMs"));
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(CupidSettings::default()).unwrap();
        assert!(json["hub"]["mailboxCapacity"].is_number());
        assert!(json["hub"]["idleTimeoutMs"].is_number());
        assert!(json["server"]["shutdownTimeoutSecs"].is_number());
        assert!(json["auth"].get("jwtSecret").is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: CupidSettings =
            serde_json::from_str(r#"{"hub":{"mailboxCapacity":8}}"#).unwrap();
        assert_eq!(settings.hub.mailbox_capacity, 8);
        assert_eq!(settings.hub.idle_timeout_ms, 60_000);
        assert_eq!(settings.server.port, 8090);
    }
}
