//! Producer-facing handle to the connection hub.
//!
//! Domain services hold a cloned [`Hub`] and address events by identity. They
//! never see sessions or the registry; every call becomes a command for the
//! dispatcher loop. Sends are fire-and-forget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cupid_core::{Envelope, Identity, ServerEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::websocket::connection::{CloseReason, Session};
use crate::websocket::dispatcher::{Command, Dispatcher};

/// Cloneable handle to a running hub.
///
/// The command channel to the dispatcher is unbounded: sessions report their
/// own unregistration on it, so it never drops a command. Queued frames are
/// bounded per session by the mailbox, and a session that cannot keep up is
/// evicted on the next fan-out.
#[derive(Clone, Debug)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<HubConfig>,
    stopping: Arc<AtomicBool>,
}

impl Hub {
    /// Spawn the dispatcher loop and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Dispatcher::new().run(rx));
        let hub = Self {
            commands,
            config: Arc::new(config),
            stopping: Arc::new(AtomicBool::new(false)),
        };
        (hub, handle)
    }

    /// Limits applied to sessions of this hub.
    pub fn config(&self) -> &Arc<HubConfig> {
        &self.config
    }

    /// Create an unregistered session for `identity` and its mailbox receiver.
    pub fn new_session(&self, identity: Identity) -> (Arc<Session>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let session = Arc::new(Session::new(identity, tx, self.commands.clone()));
        (session, rx)
    }

    /// Start routing frames to `session`.
    ///
    /// Returns `false` if the hub has stopped; the session is then closed.
    pub fn register(&self, session: Arc<Session>) -> bool {
        if self.is_shutting_down() {
            let _ = session.evict(CloseReason::Shutdown);
            return false;
        }
        match self.commands.send(Command::Register(session)) {
            Ok(()) => true,
            Err(mpsc::error::SendError(command)) => {
                if let Command::Register(session) = command {
                    let _ = session.evict(CloseReason::Shutdown);
                }
                false
            }
        }
    }

    /// Stop routing frames to `session`. Unknown sessions are ignored.
    pub fn unregister(&self, session: &Session) {
        self.submit(Command::Unregister {
            identity: session.identity().clone(),
            session_id: session.id().clone(),
        });
    }

    /// Deliver an event to every live session of `identity`.
    pub fn send_to_user(&self, identity: &Identity, event: &ServerEvent) {
        match event.to_frame() {
            Ok(frame) => self.send_frame(identity, Arc::new(frame)),
            Err(error) => warn!(%identity, %error, "dropping unserializable event"),
        }
    }

    /// Deliver a prebuilt envelope to every live session of `identity`.
    pub fn send_envelope(&self, identity: &Identity, envelope: &Envelope) {
        match envelope.to_frame() {
            Ok(frame) => self.send_frame(identity, Arc::new(frame)),
            Err(error) => warn!(%identity, kind = %envelope.kind, %error, "dropping unserializable envelope"),
        }
    }

    fn send_frame(&self, identity: &Identity, frame: Arc<String>) {
        self.submit(Command::Deliver {
            identity: identity.clone(),
            frame,
        });
    }

    /// Deliver an event to every live session.
    pub fn broadcast(&self, event: &ServerEvent) {
        match event.to_frame() {
            Ok(frame) => self.submit(Command::Broadcast {
                frame: Arc::new(frame),
            }),
            Err(error) => warn!(%error, "dropping unserializable broadcast"),
        }
    }

    /// Close every session of `identity`.
    pub fn disconnect_user(&self, identity: &Identity) {
        self.submit(Command::Disconnect {
            identity: identity.clone(),
        });
    }

    /// Whether `identity` has at least one live session.
    ///
    /// Observes every command submitted before it. `false` once the hub stopped.
    pub async fn is_online(&self, identity: &Identity) -> bool {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::IsOnline {
            identity: identity.clone(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Number of distinct online identities.
    pub async fn online_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::OnlineCount { reply });
        rx.await.unwrap_or(0)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::SessionCount { reply });
        rx.await.unwrap_or(0)
    }

    /// Close every session and stop the dispatcher loop.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("hub shutting down");
        self.submit(Command::Shutdown);
    }

    /// Whether [`Hub::shutdown`] was called or the loop has exited.
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::Acquire) || self.commands.is_closed()
    }

    fn submit(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("hub stopped, command dropped");
        }
    }
}
