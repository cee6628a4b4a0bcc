//! Credential verification boundary.
//!
//! The hub does not decide who a user is. Ingress hands the presented
//! credential to an [`IdentityVerifier`] and trusts the identity it returns.

use async_trait::async_trait;
use cupid_core::{AuthError, Identity};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::debug;

/// Turns a presented credential into an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `credential` and return the identity it belongs to.
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// HS256 JWT verifier.
///
/// The identity comes from the `sub` claim, falling back to `user_id`. `exp`
/// is required; `iss` and `aud` are checked only when configured.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Require the `aud` claim to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("issuer", &self.validation.iss)
            .field("audience", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|error| {
            debug!(%error, "token rejected");
            match error.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(error.to_string()),
            }
        })?;

        let Claims { sub, user_id } = data.claims;
        let subject = sub.or(user_id).unwrap_or_default();
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(AuthError::Invalid("missing subject".into()));
        }
        Ok(Identity::from(subject))
    }
}
