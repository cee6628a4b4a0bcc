//! Connection sessions, their pumps and liveness, and the registry loop.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::connection::Session;
    use super::dispatcher::Command;

    /// A session wired to local channels instead of a running hub.
    pub(crate) fn session_with_capacity(
        identity: &str,
        capacity: usize,
    ) -> (
        Arc<Session>,
        mpsc::Receiver<Arc<String>>,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(identity.into(), tx, commands));
        (session, rx, command_rx)
    }
}
