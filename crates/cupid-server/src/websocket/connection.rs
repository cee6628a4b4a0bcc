//! State of one live connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use cupid_core::{Identity, SessionId};
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::dispatcher::Command;

/// Why a session ended. Only the first reason is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer closed the connection.
    TransportClosed,
    /// A read or write on the transport failed.
    TransportError,
    /// No inbound traffic within the idle timeout.
    IdleTimeout,
    /// A write did not complete within the write deadline.
    WriteTimeout,
    /// The outbound mailbox was full when a frame was fanned out.
    SlowConsumer,
    /// The peer sent a message above the size limit.
    MessageTooLarge,
    /// A producer disconnected the user.
    Kicked,
    /// A producer removed this one session from the hub.
    Unregistered,
    /// The hub is stopping.
    Shutdown,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::TransportError => "transport_error",
            Self::IdleTimeout => "idle_timeout",
            Self::WriteTimeout => "write_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::MessageTooLarge => "message_too_large",
            Self::Kicked => "kicked",
            Self::Unregistered => "unregistered",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live duplex connection bound to exactly one identity.
///
/// The session is shared between its two pumps, its liveness monitor and the
/// registry. Outbound frames go through a bounded mailbox; closing is
/// idempotent and wakes every task waiting on [`Session::closed`].
pub struct Session {
    id: SessionId,
    identity: Identity,
    mailbox: mpsc::Sender<Arc<String>>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
    probe: Notify,
    last_activity: Mutex<Instant>,
    connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl Session {
    /// Create a session with a fresh ID.
    ///
    /// `commands` is the dispatcher channel the session reports its own
    /// unregistration on.
    pub fn new(
        identity: Identity,
        mailbox: mpsc::Sender<Arc<String>>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::new(),
            identity,
            mailbox,
            commands,
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
            probe: Notify::new(),
            last_activity: Mutex::new(now),
            connected_at: now,
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Owning identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue a serialized frame without waiting.
    ///
    /// Returns `false` if the session is closed, the mailbox is full, or the
    /// outbound pump is gone.
    pub fn enqueue(&self, frame: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.mailbox.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Close the session and ask the dispatcher to unregister it.
    ///
    /// Only the first call has an effect and returns `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        if !self.mark_closed(reason) {
            return false;
        }
        let _ = self.commands.send(Command::Unregister {
            identity: self.identity.clone(),
            session_id: self.id.clone(),
        });
        true
    }

    /// Close on behalf of the dispatcher, which has already removed the entry.
    pub(crate) fn evict(&self, reason: CloseReason) -> bool {
        self.mark_closed(reason)
    }

    fn mark_closed(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        self.cancel.cancel();
        true
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The reason recorded by the first close.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Ask the outbound pump to send a keepalive probe.
    pub fn request_probe(&self) {
        self.probe.notify_one();
    }

    /// Resolves when a keepalive probe has been requested.
    pub fn probe_requested(&self) -> Notified<'_> {
        self.probe.notified()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames refused because the mailbox was full or gone.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::test_support::session_with_capacity;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn enqueue_success() {
        let (session, mut rx, _commands) = session_with_capacity("u_1", 4);
        assert!(session.enqueue(Arc::new("hello".into())));
        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, "hello");
    }

    #[test]
    fn enqueue_to_full_mailbox_returns_false() {
        let (session, _rx, _commands) = session_with_capacity("u_1", 1);
        assert!(session.enqueue(Arc::new("first".into())));
        assert!(!session.enqueue(Arc::new("second".into())));
        assert_eq!(session.dropped_frames(), 1);
    }

    #[test]
    fn enqueue_after_pump_gone_returns_false() {
        let (session, rx, _commands) = session_with_capacity("u_1", 4);
        drop(rx);
        assert!(!session.enqueue(Arc::new("late".into())));
    }

    #[test]
    fn enqueue_after_close_returns_false() {
        let (session, _rx, _commands) = session_with_capacity("u_1", 4);
        assert!(session.close(CloseReason::TransportClosed));
        assert!(!session.enqueue(Arc::new("late".into())));
        assert_eq!(session.dropped_frames(), 0);
    }

    #[test]
    fn close_is_idempotent_and_unregisters_once() {
        let (session, _rx, mut commands) = session_with_capacity("u_1", 4);

        assert!(session.close(CloseReason::IdleTimeout));
        assert!(!session.close(CloseReason::TransportError));
        assert!(!session.close(CloseReason::Kicked));

        assert_eq!(session.close_reason(), Some(CloseReason::IdleTimeout));
        assert_matches!(
            commands.try_recv(),
            Ok(Command::Unregister { identity, session_id })
                if identity.as_str() == "u_1" && &session_id == session.id()
        );
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn evict_does_not_unregister() {
        let (session, _rx, mut commands) = session_with_capacity("u_1", 4);
        assert!(session.evict(CloseReason::SlowConsumer));
        assert!(!session.close(CloseReason::TransportClosed));
        assert_eq!(session.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (session, _rx, _commands) = session_with_capacity("u_1", 4);
        let waiter = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            waiter.closed().await;
            waiter.close_reason()
        });

        let _ = session.close(CloseReason::Shutdown);
        assert_eq!(handle.await.unwrap(), Some(CloseReason::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let (session, _rx, _commands) = session_with_capacity("u_1", 4);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(session.idle_for() >= Duration::from_secs(5));

        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
        assert!(session.age() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn probe_request_is_remembered() {
        let (session, _rx, _commands) = session_with_capacity("u_1", 4);
        // Notify stores one permit when nobody is waiting yet
        session.request_probe();
        tokio::time::timeout(Duration::from_secs(1), session.probe_requested())
            .await
            .unwrap();
    }

    #[test]
    fn session_ids_are_unique() {
        let (a, _rx_a, _ca) = session_with_capacity("u_1", 1);
        let (b, _rx_b, _cb) = session_with_capacity("u_1", 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::SlowConsumer.as_str(), "slow_consumer");
        assert_eq!(CloseReason::Unregistered.as_str(), "unregistered");
        assert_eq!(CloseReason::IdleTimeout.to_string(), "idle_timeout");
        assert_eq!(CloseReason::MessageTooLarge.to_string(), "message_too_large");
    }

    #[test]
    fn debug_omits_channels() {
        let (session, _rx, _commands) = session_with_capacity("u_7", 1);
        let debug = format!("{session:?}");
        assert!(debug.contains("u_7"));
        assert!(debug.contains("closed: false"));
    }
}
