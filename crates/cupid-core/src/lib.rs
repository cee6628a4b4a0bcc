//! # cupid-core
//!
//! Foundation types shared by every Cupid crate:
//!
//! - **IDs**: [`Identity`](ids::Identity) (externally supplied user key) and
//!   [`SessionId`](ids::SessionId) (one per live connection)
//! - **Events**: [`ServerEvent`](events::ServerEvent) / [`ClientEvent`](events::ClientEvent)
//!   and the wire-level [`Envelope`](events::Envelope)
//! - **Errors**: `thiserror` types for the auth boundary and envelope encoding
//! - **Limits**: default transport limits of the hub
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;

pub use errors::{AuthError, EnvelopeError};
pub use events::{ClientEvent, Envelope, ServerEvent};
pub use ids::{Identity, SessionId};
