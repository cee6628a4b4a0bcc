//! Error types shared across the hub boundary.

use thiserror::Error;

/// Failure to establish an identity for an inbound connection attempt.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,
    /// The credential has expired.
    #[error("credential expired")]
    Expired,
    /// The credential was presented but could not be verified.
    #[error("invalid credential: {0}")]
    Invalid(String),
}

impl AuthError {
    /// Machine-readable code for HTTP error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::Expired => "CREDENTIAL_EXPIRED",
            Self::Invalid(_) => "INVALID_CREDENTIAL",
        }
    }
}

/// Failure to turn a producer payload into a wire frame.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The payload could not be serialized to JSON.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The payload serialized to something other than a `{type, payload}` object.
    #[error("payload is not a tagged envelope")]
    NotTagged,
}
