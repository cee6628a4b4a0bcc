//! # cupid-server
//!
//! Real-time connection hub and its Axum front.
//!
//! - Connection sessions with bounded mailboxes, coalescing outbound pump,
//!   size- and idle-checked inbound pump, and a liveness monitor
//! - A single dispatcher task owning the identity → sessions registry
//! - A cloneable [`Hub`](hub::Hub) handle for producers (`send_to_user`, `is_online`, ...)
//! - `GET /ws` ingress gated by an [`IdentityVerifier`](auth::IdentityVerifier)
//! - `/health`, `/metrics`, `/presence/{user_id}` and graceful shutdown

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod hub;
pub mod ingress;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{IdentityVerifier, JwtVerifier};
pub use config::{HubConfig, ServerConfig};
pub use hub::Hub;
pub use server::{CupidServer, ServerError};
pub use websocket::connection::CloseReason;
pub use websocket::handler::{InboundHandler, TypingRelay};
