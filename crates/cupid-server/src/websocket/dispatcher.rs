//! The single task that owns the registry.
//!
//! Every registry mutation and query is a [`Command`] on one unbounded FIFO
//! channel, so per-identity ordering of register, fan-out and unregister is
//! the submission order. Queries reply through a `oneshot` and therefore
//! observe every command submitted before them.

use std::ops::ControlFlow;
use std::sync::Arc;

use cupid_core::{Identity, SessionId};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::connection::{CloseReason, Session};
use super::registry::{Delivery, Registry};
use crate::metrics::{
    HUB_ENVELOPES_UNDELIVERABLE_TOTAL, HUB_FRAMES_ENQUEUED_TOTAL, HUB_SESSIONS_ACTIVE,
    HUB_SLOW_CONSUMER_EVICTIONS_TOTAL, HUB_USERS_ONLINE,
};

/// A request to the dispatcher loop.
#[derive(Debug)]
pub enum Command {
    /// Start routing frames to a session.
    Register(Arc<Session>),
    /// Forget a session. Unknown sessions are ignored.
    Unregister {
        /// Owning identity.
        identity: Identity,
        /// Session to remove.
        session_id: SessionId,
    },
    /// Queue a frame on every session of an identity.
    Deliver {
        /// Addressee.
        identity: Identity,
        /// Serialized envelope(s).
        frame: Arc<String>,
    },
    /// Queue a frame on every live session.
    Broadcast {
        /// Serialized envelope(s).
        frame: Arc<String>,
    },
    /// Close every session of an identity.
    Disconnect {
        /// Identity to disconnect.
        identity: Identity,
    },
    /// Whether an identity has a live session.
    IsOnline {
        /// Identity to look up.
        identity: Identity,
        /// Answer channel.
        reply: oneshot::Sender<bool>,
    },
    /// Number of distinct online identities.
    OnlineCount {
        /// Answer channel.
        reply: oneshot::Sender<usize>,
    },
    /// Number of live sessions.
    SessionCount {
        /// Answer channel.
        reply: oneshot::Sender<usize>,
    },
    /// Close every session and stop the loop.
    Shutdown,
}

/// Registry owner driven by [`Command`]s.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: Registry,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Apply one command. Returns `Break` after [`Command::Shutdown`].
    pub fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Register(session) => {
                if self.registry.insert(Arc::clone(&session)) {
                    debug!(
                        identity = %session.identity(),
                        session_id = %session.id(),
                        "session registered"
                    );
                } else {
                    debug!(session_id = %session.id(), "skipping registration of closed session");
                }
            }
            Command::Unregister {
                identity,
                session_id,
            } => {
                if let Some(session) = self.registry.remove(&identity, &session_id) {
                    // Still open only when a producer asked for the removal
                    let _ = session.evict(CloseReason::Unregistered);
                    debug!(%identity, %session_id, "session unregistered");
                }
            }
            Command::Deliver { identity, frame } => {
                let delivery = self.registry.deliver(&identity, &frame);
                if delivery.enqueued == 0 && delivery.evicted == 0 {
                    counter!(HUB_ENVELOPES_UNDELIVERABLE_TOTAL).increment(1);
                }
                record_delivery(delivery, Some(&identity));
            }
            Command::Broadcast { frame } => {
                let delivery = self.registry.broadcast(&frame);
                record_delivery(delivery, None);
            }
            Command::Disconnect { identity } => {
                let sessions = self.registry.drain_user(&identity);
                if !sessions.is_empty() {
                    info!(%identity, sessions = sessions.len(), "disconnecting user");
                }
                for session in sessions {
                    let _ = session.evict(CloseReason::Kicked);
                }
            }
            Command::IsOnline { identity, reply } => {
                let _ = reply.send(self.registry.is_online(&identity));
            }
            Command::OnlineCount { reply } => {
                let _ = reply.send(self.registry.online_count());
            }
            Command::SessionCount { reply } => {
                let _ = reply.send(self.registry.session_count());
            }
            Command::Shutdown => {
                self.close_all();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Consume commands until shutdown or until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("dispatcher started");
        while let Some(command) = commands.recv().await {
            let flow = self.handle(command);
            self.publish_gauges();
            if flow.is_break() {
                break;
            }
        }

        // Commands queued behind shutdown are answered by closing
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Register(session) = command {
                let _ = session.evict(CloseReason::Shutdown);
            }
        }
        self.close_all();
        self.publish_gauges();
        info!("dispatcher stopped");
    }

    fn close_all(&mut self) {
        let sessions = self.registry.drain_all();
        if !sessions.is_empty() {
            info!(sessions = sessions.len(), "closing all sessions");
        }
        for session in sessions {
            let _ = session.evict(CloseReason::Shutdown);
        }
    }

    fn publish_gauges(&self) {
        gauge!(HUB_SESSIONS_ACTIVE).set(self.registry.session_count() as f64);
        gauge!(HUB_USERS_ONLINE).set(self.registry.online_count() as f64);
    }
}

fn record_delivery(delivery: Delivery, identity: Option<&Identity>) {
    counter!(HUB_FRAMES_ENQUEUED_TOTAL).increment(delivery.enqueued as u64);
    if delivery.evicted > 0 {
        counter!(HUB_SLOW_CONSUMER_EVICTIONS_TOTAL).increment(delivery.evicted as u64);
        match identity {
            Some(identity) => {
                warn!(%identity, evicted = delivery.evicted, "evicted slow consumers");
            }
            None => warn!(evicted = delivery.evicted, "evicted slow consumers during broadcast"),
        }
    }
}
