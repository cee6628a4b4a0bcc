//! `CupidServer`: Axum HTTP + WebSocket front of the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, PresenceResponse};
use crate::hub::Hub;
use crate::ingress;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::{InboundHandler, TypingRelay};

/// Failure to start the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Other listener I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Producer handle to the hub.
    pub hub: Hub,
    /// Credential verification boundary.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Receiver of decoded client events.
    pub inbound: Arc<dyn InboundHandler>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    /// Whether new connections should be refused.
    pub fn is_shutting_down(&self) -> bool {
        self.hub.is_shutting_down() || self.shutdown.is_shutting_down()
    }
}

/// The Cupid connection hub server.
pub struct CupidServer {
    config: ServerConfig,
    state: AppState,
}

impl CupidServer {
    /// Create a server in front of `hub`.
    ///
    /// Inbound typing indicators are relayed through the hub unless another
    /// handler is set with [`CupidServer::with_inbound`].
    pub fn new(config: ServerConfig, hub: Hub, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let inbound = Arc::new(TypingRelay::new(hub.clone()));
        Self {
            config,
            state: AppState {
                hub,
                verifier,
                inbound,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Replace the inbound event handler.
    #[must_use]
    pub fn with_inbound(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.state.inbound = handler;
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ingress::ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/presence/{user_id}", get(presence_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until the shutdown coordinator fires.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = served {
                error!(%error, "server terminated");
            }
        });

        info!(%local_addr, "cupid hub listening");
        Ok((local_addr, handle))
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.hub.session_count().await;
    let users_online = state.hub.online_count().await;
    Json(health::health_check(
        state.start_time,
        state.is_shutting_down(),
        sessions,
        users_online,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /presence/{user_id}
async fn presence_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<PresenceResponse> {
    let online = state.hub.is_online(&user_id.as_str().into()).await;
    Json(PresenceResponse { user_id, online })
}
