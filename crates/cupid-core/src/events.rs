//! Wire events exchanged between the hub and mobile clients.
//!
//! Producers build a typed [`ServerEvent`]; before it enters any mailbox it is
//! downgraded to a generic [`Envelope`] and serialized exactly once. The hub
//! itself only ever sees serialized frames, so it stays payload-agnostic.
//!
//! Wire format: each envelope is a JSON object `{"type": ..., "payload": ...}`
//! (`payload` omitted when empty). Several envelopes may share one text frame,
//! separated by `\n`; every line is an independent envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::ENVELOPE_SEPARATOR;
use crate::errors::EnvelopeError;
use crate::ids::{Identity, SessionId};

/// Generic tagged envelope, the unit of fan-out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with a payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an envelope that carries only its type tag.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Downgrade any adjacently tagged value (`{"type", "payload"}`) to an envelope.
    pub fn from_tagged<T: Serialize>(value: &T) -> Result<Self, EnvelopeError> {
        let Value::Object(mut map) = serde_json::to_value(value)? else {
            return Err(EnvelopeError::NotTagged);
        };
        let Some(Value::String(kind)) = map.remove("type") else {
            return Err(EnvelopeError::NotTagged);
        };
        let payload = map.remove("payload").unwrap_or(Value::Null);
        Ok(Self { kind, payload })
    }

    /// Serialize to a single-line JSON frame.
    pub fn to_frame(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Split a text frame into its newline-delimited envelope segments.
///
/// Blank segments are skipped.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(ENVELOPE_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// Events pushed from the server to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First envelope on every connection.
    Connected {
        /// The hub-assigned session ID of this connection.
        session_id: SessionId,
    },
    /// A chat message arrived in one of the user's matches.
    MessageReceived {
        /// Match the conversation belongs to.
        match_id: String,
        /// Stored message ID.
        message_id: String,
        /// Author of the message.
        sender_id: Identity,
        /// Message text.
        body: String,
        /// When the message was stored.
        sent_at: DateTime<Utc>,
    },
    /// The other side of a match read the conversation.
    MessagesRead {
        /// Match the conversation belongs to.
        match_id: String,
        /// User who read the messages.
        reader_id: Identity,
    },
    /// Someone liked the user's profile.
    LikeReceived {
        /// User who sent the like.
        from_user_id: Identity,
        /// Whether the like was a super like.
        super_like: bool,
    },
    /// A mutual like produced a match.
    MatchCreated {
        /// New match ID.
        match_id: String,
        /// The other user in the match.
        user_id: Identity,
    },
    /// A match was removed (unmatch, block, or account deletion).
    MatchDeleted {
        /// Removed match ID.
        match_id: String,
    },
    /// The other side of a match is typing.
    Typing {
        /// Match the conversation belongs to.
        match_id: String,
        /// User who is typing.
        user_id: Identity,
    },
    /// The user's credit balance changed.
    CreditsUpdated {
        /// New balance.
        balance: i64,
    },
    /// Reply to a client `ping`.
    Pong,
}

impl ServerEvent {
    /// Downgrade to a generic envelope.
    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        Envelope::from_tagged(self)
    }

    /// Serialize straight to a wire frame.
    pub fn to_frame(&self) -> Result<String, EnvelopeError> {
        self.to_envelope()?.to_frame()
    }
}

/// Events sent by clients. Anything that does not decode into one of these is
/// discarded by the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The user is typing in a conversation.
    Typing {
        /// Match the conversation belongs to.
        match_id: String,
        /// The other user in the match.
        to_user_id: Identity,
    },
    /// Application-level keepalive; answered with [`ServerEvent::Pong`].
    Ping,
}

impl ClientEvent {
    /// Decode one envelope segment. Returns `None` for unknown or malformed input.
    pub fn decode(segment: &str) -> Option<Self> {
        serde_json::from_str(segment).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn match_deleted_wire_shape() {
        let event = ServerEvent::MatchDeleted {
            match_id: "m_1".into(),
        };
        let value: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "match_deleted", "payload": {"match_id": "m_1"}}));
    }

    #[test]
    fn unit_event_omits_payload() {
        let frame = ServerEvent::Pong.to_frame().unwrap();
        assert_eq!(frame, r#"{"type":"pong"}"#);
    }

    #[test]
    fn bare_envelope_omits_payload() {
        let frame = Envelope::bare("ping").to_frame().unwrap();
        assert_eq!(frame, r#"{"type":"ping"}"#);
    }

    #[test]
    fn envelope_from_event_keeps_payload() {
        let event = ServerEvent::LikeReceived {
            from_user_id: "u_9".into(),
            super_like: true,
        };
        let envelope = event.to_envelope().unwrap();
        assert_eq!(envelope.kind, "like_received");
        assert_eq!(envelope.payload["from_user_id"], "u_9");
        assert_eq!(envelope.payload["super_like"], true);
    }

    #[test]
    fn message_received_serializes_timestamp() {
        let sent_at = DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = ServerEvent::MessageReceived {
            match_id: "m_1".into(),
            message_id: "msg_1".into(),
            sender_id: "u_1".into(),
            body: "hi".into(),
            sent_at,
        };
        let envelope = event.to_envelope().unwrap();
        assert_eq!(envelope.payload["sent_at"], "2026-02-01T10:00:00Z");
        assert_eq!(envelope.payload["body"], "hi");
    }

    #[test]
    fn from_tagged_rejects_untagged_values() {
        assert_matches!(Envelope::from_tagged(&json!([1, 2])), Err(EnvelopeError::NotTagged));
        assert_matches!(
            Envelope::from_tagged(&json!({"payload": {}})),
            Err(EnvelopeError::NotTagged)
        );
        assert_matches!(
            Envelope::from_tagged(&json!({"type": 7})),
            Err(EnvelopeError::NotTagged)
        );
    }

    #[test]
    fn split_frame_skips_blank_segments() {
        let frame = "{\"type\":\"a\"}\n\n{\"type\":\"b\"}\n";
        let segments: Vec<&str> = split_frame(frame).collect();
        assert_eq!(segments, vec![r#"{"type":"a"}"#, r#"{"type":"b"}"#]);
    }

    #[test]
    fn decode_typing() {
        let event =
            ClientEvent::decode(r#"{"type":"typing","payload":{"match_id":"m1","to_user_id":"u2"}}"#);
        assert_eq!(
            event,
            Some(ClientEvent::Typing {
                match_id: "m1".into(),
                to_user_id: "u2".into(),
            })
        );
    }

    #[test]
    fn decode_ping_without_payload() {
        assert_eq!(ClientEvent::decode(r#"{"type":"ping"}"#), Some(ClientEvent::Ping));
    }

    #[test]
    fn decode_discards_unknown_and_malformed() {
        assert_eq!(ClientEvent::decode(r#"{"type":"teleport"}"#), None);
        assert_eq!(ClientEvent::decode("not json"), None);
        assert_eq!(ClientEvent::decode(r#"{"type":"typing","payload":{}}"#), None);
        assert_eq!(ClientEvent::decode(""), None);
    }
}
