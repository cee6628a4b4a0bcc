//! `GET /ws`: authenticate, then upgrade and hand the connection to the hub.
//!
//! Nothing touches the registry until the credential has been verified and the
//! upgrade accepted. A session is registered only after its `connected`
//! envelope is queued, so that envelope is always the first one on the wire.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use cupid_core::{AuthError, Identity, ServerEvent};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::server::AppState;
use crate::websocket::session::run_session;

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Credential for clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

/// Why an upgrade was refused.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The credential was missing or did not verify.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The hub no longer accepts sessions.
    #[error("hub is shutting down")]
    ShuttingDown,
    /// The request was not a valid WebSocket upgrade.
    #[error(transparent)]
    Upgrade(#[from] WebSocketUpgradeRejection),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            Self::Auth(error) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": error.code(), "message": error.to_string()})),
            )
                .into_response(),
            Self::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "SHUTTING_DOWN", "message": "hub is shutting down"})),
            )
                .into_response(),
            Self::Upgrade(rejection) => rejection.into_response(),
        }
    }
}

/// Extract the credential from `Authorization: Bearer` or the `token` query.
fn credential(headers: &HeaderMap, params: ConnectParams) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned);

    from_header.or_else(|| params.token.filter(|token| !token.trim().is_empty()))
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, IngressError> {
    if state.is_shutting_down() {
        return Err(IngressError::ShuttingDown);
    }

    let credential = credential(&headers, params).ok_or(AuthError::MissingCredential)?;
    let identity = state.verifier.verify(&credential).await.inspect_err(|error| {
        debug!(code = error.code(), "upgrade refused");
    })?;
    let upgrade = upgrade?;

    let max_message_bytes = state.hub.config().max_message_bytes;
    Ok(upgrade
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| accept(socket, identity, state))
        .into_response())
}

async fn accept(socket: WebSocket, identity: Identity, state: AppState) {
    let hub = &state.hub;
    let (session, mailbox) = hub.new_session(identity);

    let connected = ServerEvent::Connected {
        session_id: session.id().clone(),
    };
    match connected.to_frame() {
        Ok(frame) => {
            let _ = session.enqueue(Arc::new(frame));
        }
        Err(error) => warn!(%error, "failed to serialize connected envelope"),
    }

    if !hub.register(Arc::clone(&session)) {
        info!(identity = %session.identity(), "hub stopped before registration, dropping connection");
        return;
    }

    let _ = run_session(
        socket,
        session,
        mailbox,
        Arc::clone(hub.config()),
        Arc::clone(&state.inbound),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    fn params(token: Option<&str>) -> ConnectParams {
        ConnectParams {
            token: token.map(str::to_owned),
        }
    }

    #[test]
    fn bearer_header_wins() {
        let found = credential(&headers("Bearer abc"), params(Some("query")));
        assert_eq!(found.as_deref(), Some("abc"));
    }

    #[test]
    fn query_token_is_fallback() {
        let found = credential(&HeaderMap::new(), params(Some("xyz")));
        assert_eq!(found.as_deref(), Some("xyz"));
    }

    #[test]
    fn non_bearer_header_is_ignored() {
        let found = credential(&headers("Basic dXNlcjpwYXNz"), params(None));
        assert!(found.is_none());
    }

    #[test]
    fn empty_values_count_as_missing() {
        assert!(credential(&headers("Bearer   "), params(Some(""))).is_none());
        assert!(credential(&HeaderMap::new(), params(None)).is_none());
    }

    #[tokio::test]
    async fn auth_error_maps_to_401() {
        let resp = IngressError::from(AuthError::Expired).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "CREDENTIAL_EXPIRED");
    }

    #[test]
    fn shutting_down_maps_to_503() {
        let resp = IngressError::ShuttingDown.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
