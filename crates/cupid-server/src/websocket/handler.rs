//! Inbound message dispatch: splits text frames into envelopes, decodes them
//! as [`ClientEvent`]s and routes them to an [`InboundHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use cupid_core::events::split_frame;
use cupid_core::{ClientEvent, Identity, ServerEvent};
use tracing::{debug, warn};

use super::connection::Session;
use crate::hub::Hub;

/// Receives client events decoded from a session's inbound stream.
///
/// `ping` never reaches the handler; the session answers it itself.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one event sent by `sender`.
    async fn handle(&self, sender: &Identity, event: ClientEvent);
}

/// Relays typing indicators to the other side of a match.
#[derive(Clone, Debug)]
pub struct TypingRelay {
    hub: Hub,
}

impl TypingRelay {
    /// Create a relay that forwards through `hub`.
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl InboundHandler for TypingRelay {
    async fn handle(&self, sender: &Identity, event: ClientEvent) {
        match event {
            ClientEvent::Typing {
                match_id,
                to_user_id,
            } => {
                if &to_user_id == sender {
                    debug!(%sender, "ignoring typing indicator addressed to self");
                    return;
                }
                self.hub.send_to_user(
                    &to_user_id,
                    &ServerEvent::Typing {
                        match_id,
                        user_id: sender.clone(),
                    },
                );
            }
            ClientEvent::Ping => {}
        }
    }
}

/// Process one inbound text frame.
///
/// Each newline-separated segment is decoded independently; malformed or
/// unknown segments are discarded without affecting the session.
pub async fn handle_text(session: &Session, text: &str, handler: &dyn InboundHandler) {
    for segment in split_frame(text) {
        match ClientEvent::decode(segment) {
            Some(ClientEvent::Ping) => reply_pong(session),
            Some(event) => handler.handle(session.identity(), event).await,
            None => debug!(len = segment.len(), "discarding malformed inbound envelope"),
        }
    }
}

fn reply_pong(session: &Session) {
    match ServerEvent::Pong.to_frame() {
        Ok(frame) => {
            if !session.enqueue(Arc::new(frame)) {
                debug!("pong not queued, mailbox full or closed");
            }
        }
        Err(error) => warn!(%error, "failed to serialize pong"),
    }
}
