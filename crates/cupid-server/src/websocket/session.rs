//! Session lifecycle: the inbound and outbound pumps of one connection, from
//! upgrade through disconnect.
//!
//! The pumps are generic over `Sink`/`Stream` so they can be driven by an
//! axum `WebSocket` in production and by in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use cupid_core::constants::ENVELOPE_SEPARATOR;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, instrument};

use super::connection::{CloseReason, Session};
use super::handler::{InboundHandler, handle_text};
use super::heartbeat::run_heartbeat;
use crate::config::HubConfig;
use crate::metrics::{HUB_CONNECTIONS_TOTAL, HUB_DISCONNECTIONS_TOTAL, HUB_SESSION_DURATION_SECONDS};

/// Run a registered session over an upgraded WebSocket until it closes.
///
/// Spawns the outbound pump and the liveness monitor, runs the inbound pump
/// on the current task, and returns the first close reason.
#[instrument(skip_all, fields(identity = %session.identity(), session_id = %session.id()))]
pub async fn run_session(
    socket: WebSocket,
    session: Arc<Session>,
    mailbox: mpsc::Receiver<Arc<String>>,
    config: Arc<HubConfig>,
    handler: Arc<dyn InboundHandler>,
) -> CloseReason {
    let (sink, stream) = socket.split();

    info!("session opened");
    counter!(HUB_CONNECTIONS_TOTAL).increment(1);

    let outbound = tokio::spawn(
        run_outbound(Arc::clone(&session), mailbox, sink, Arc::clone(&config)).in_current_span(),
    );
    let monitor = tokio::spawn(
        run_heartbeat(
            Arc::clone(&session),
            config.keepalive_interval,
            config.idle_timeout,
        )
        .in_current_span(),
    );

    let inbound_reason = run_inbound(Arc::clone(&session), stream, &config, handler.as_ref()).await;
    let _ = session.close(inbound_reason);

    // Both exit once the session is closed; the outbound pump is bounded by the write deadline
    let _ = outbound.await;
    let _ = monitor.await;

    let reason = session.close_reason().unwrap_or(inbound_reason);
    info!(%reason, dropped_frames = session.dropped_frames(), "session closed");
    counter!(HUB_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(HUB_SESSION_DURATION_SECONDS).record(session.age().as_secs_f64());
    reason
}

/// Drain the mailbox into the transport.
///
/// Queued frames are coalesced into one text message (joined by `\n`, at most
/// `coalesce_max_frames`). Keepalive probes become Ping frames. Every write is
/// bounded by the write deadline; a failed or stalled write closes the session.
/// On exit a Close frame is attempted once.
pub async fn run_outbound<S>(
    session: Arc<Session>,
    mut mailbox: mpsc::Receiver<Arc<String>>,
    mut sink: S,
    config: Arc<HubConfig>,
) -> CloseReason
where
    S: Sink<Message> + Unpin,
{
    let reason = loop {
        tokio::select! {
            biased;
            () = session.closed() => {
                break session.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            frame = mailbox.recv() => {
                let Some(first) = frame else {
                    break CloseReason::TransportClosed;
                };
                let text = coalesce(first, &mut mailbox, config.coalesce_max_frames);
                if let Err(reason) = write(&mut sink, Message::Text(text.into()), config.write_timeout).await {
                    break reason;
                }
            }
            () = session.probe_requested() => {
                if let Err(reason) = write(&mut sink, Message::Ping(Bytes::new()), config.write_timeout).await {
                    break reason;
                }
            }
        }
    };

    if session.close(reason) {
        debug!(%reason, "outbound pump closed session");
    }
    // Best effort; the peer may already be gone
    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
    session.close_reason().unwrap_or(reason)
}

/// Read from the transport until it ends, fails, goes silent, or the session closes.
///
/// Every received frame, including Pong, refreshes the idle deadline.
pub async fn run_inbound<R, E>(
    session: Arc<Session>,
    mut stream: R,
    config: &HubConfig,
    handler: &dyn InboundHandler,
) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        let next = tokio::select! {
            biased;
            () = session.closed() => {
                break session.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            next = timeout(config.idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(None) => break CloseReason::TransportClosed,
            Ok(Some(Err(error))) => {
                debug!(%error, "transport read failed");
                break CloseReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };
        session.touch();

        match message {
            Message::Text(text) => {
                if text.len() > config.max_message_bytes {
                    break CloseReason::MessageTooLarge;
                }
                handle_text(&session, text.as_str(), handler).await;
            }
            Message::Binary(data) => {
                if data.len() > config.max_message_bytes {
                    break CloseReason::MessageTooLarge;
                }
                match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(&session, text, handler).await,
                    Err(_) => debug!(len = data.len(), "discarding non-UTF-8 binary frame"),
                }
            }
            Message::Close(_) => break CloseReason::TransportClosed,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    };

    if session.close(reason) {
        debug!(%reason, "inbound pump closed session");
    }
    session.close_reason().unwrap_or(reason)
}

fn coalesce(
    first: Arc<String>,
    mailbox: &mut mpsc::Receiver<Arc<String>>,
    max_frames: usize,
) -> String {
    let mut text = Arc::unwrap_or_clone(first);
    for _ in 1..max_frames {
        let Ok(next) = mailbox.try_recv() else {
            break;
        };
        text.push(ENVELOPE_SEPARATOR);
        text.push_str(&next);
    }
    text
}

async fn write<S>(sink: &mut S, message: Message, deadline: Duration) -> Result<(), CloseReason>
where
    S: Sink<Message> + Unpin,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(CloseReason::TransportError),
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::dispatcher::Command;
    use crate::websocket::test_support::session_with_capacity;
    use async_trait::async_trait;
    use cupid_core::{ClientEvent, Identity};
    use futures::channel::mpsc as transport;
    use futures::sink;
    use std::convert::Infallible;

    struct Ignore;

    #[async_trait]
    impl InboundHandler for Ignore {
        async fn handle(&self, _sender: &Identity, _event: ClientEvent) {}
    }

    fn config() -> Arc<HubConfig> {
        Arc::new(HubConfig {
            coalesce_max_frames: 3,
            max_message_bytes: 64,
            ..HubConfig::default()
        })
    }

    fn text(message: Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    // ── outbound ────────────────────────────────────────────────────

    #[tokio::test]
    async fn queued_frames_are_coalesced() {
        let (session, rx, _c) = session_with_capacity("u_1", 8);
        for i in 0..5 {
            assert!(session.enqueue(Arc::new(format!("{{\"n\":{i}}}"))));
        }
        let (tx, mut written) = transport::unbounded::<Message>();
        let pump = tokio::spawn(run_outbound(Arc::clone(&session), rx, tx, config()));

        let first = text(written.next().await.unwrap());
        let second = text(written.next().await.unwrap());
        assert_eq!(first, "{\"n\":0}\n{\"n\":1}\n{\"n\":2}");
        assert_eq!(second, "{\"n\":3}\n{\"n\":4}");

        let _ = session.close(CloseReason::Kicked);
        assert_eq!(pump.await.unwrap(), CloseReason::Kicked);
        assert!(matches!(written.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn probe_becomes_ping_frame() {
        let (session, rx, _c) = session_with_capacity("u_1", 8);
        let (tx, mut written) = transport::unbounded::<Message>();
        let pump = tokio::spawn(run_outbound(Arc::clone(&session), rx, tx, config()));

        session.request_probe();
        assert!(matches!(written.next().await, Some(Message::Ping(_))));

        let _ = session.close(CloseReason::TransportClosed);
        let _ = pump.await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_closes_session() {
        let (session, rx, mut commands) = session_with_capacity("u_1", 8);
        let (tx, written) = transport::unbounded::<Message>();
        drop(written);

        assert!(session.enqueue(Arc::new("x".into())));
        let reason = run_outbound(Arc::clone(&session), rx, tx, config()).await;

        assert_eq!(reason, CloseReason::TransportError);
        assert!(session.is_closed());
        assert!(matches!(commands.try_recv(), Ok(Command::Unregister { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (session, rx, _c) = session_with_capacity("u_1", 8);
        // A sink that never accepts anything
        let stalled = sink::drain().with(|_: Message| futures::future::pending::<Result<Message, Infallible>>());

        assert!(session.enqueue(Arc::new("x".into())));
        let reason = run_outbound(Arc::clone(&session), rx, Box::pin(stalled), config()).await;

        assert_eq!(reason, CloseReason::WriteTimeout);
        assert_eq!(session.close_reason(), Some(CloseReason::WriteTimeout));
    }

    // ── inbound ─────────────────────────────────────────────────────

    fn inbound_stream(
        messages: Vec<Message>,
    ) -> impl Stream<Item = Result<Message, Infallible>> + Unpin {
        futures::stream::iter(messages.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn end_of_stream_is_transport_closed() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let reason = run_inbound(Arc::clone(&session), inbound_stream(vec![]), &config(), &Ignore).await;
        assert_eq!(reason, CloseReason::TransportClosed);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let stream = inbound_stream(vec![Message::Close(None), Message::Text("late".into())]);
        let reason = run_inbound(Arc::clone(&session), stream, &config(), &Ignore).await;
        assert_eq!(reason, CloseReason::TransportClosed);
    }

    #[tokio::test]
    async fn oversize_message_closes_session() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let big = "x".repeat(65);
        let stream = inbound_stream(vec![Message::Text(big.into())]);
        let reason = run_inbound(Arc::clone(&session), stream, &config(), &Ignore).await;
        assert_eq!(reason, CloseReason::MessageTooLarge);
    }

    #[tokio::test]
    async fn malformed_payload_keeps_session_open() {
        let (session, mut rx, _c) = session_with_capacity("u_1", 8);
        let (mut tx, stream) = transport::unbounded::<Result<Message, Infallible>>();
        let pump = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { run_inbound(session, stream, &config(), &Ignore).await })
        };

        tx.send(Ok(Message::Text("{not json".into()))).await.unwrap();
        tx.send(Ok(Message::Binary(Bytes::from_static(&[0xff, 0xfe])))).await.unwrap();
        tx.send(Ok(Message::Binary(Bytes::from_static(br#"{"type":"ping"}"#))))
            .await
            .unwrap();

        // the ping after the garbage is still answered
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"type":"pong"}"#);
        assert!(!session.is_closed());

        drop(tx);
        assert_eq!(pump.await.unwrap(), CloseReason::TransportClosed);
    }

    #[tokio::test]
    async fn read_error_is_transport_error() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let stream = futures::stream::iter(vec![Err::<Message, _>("connection reset")]);
        let reason = run_inbound(Arc::clone(&session), stream, &config(), &Ignore).await;
        assert_eq!(reason, CloseReason::TransportError);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_idle_timeout_closes() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let (_tx, stream) = transport::unbounded::<Result<Message, Infallible>>();
        let reason = run_inbound(Arc::clone(&session), stream, &config(), &Ignore).await;
        assert_eq!(reason, CloseReason::IdleTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_refreshes_idle_deadline() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let (mut tx, stream) = transport::unbounded::<Result<Message, Infallible>>();
        let pump = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { run_inbound(session, stream, &config(), &Ignore).await })
        };

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(45)).await;
            tx.send(Ok(Message::Pong(Bytes::new()))).await.unwrap();
        }
        assert!(!session.is_closed());

        let _ = session.close(CloseReason::Kicked);
        assert_eq!(pump.await.unwrap(), CloseReason::Kicked);
    }

    #[tokio::test]
    async fn external_close_stops_inbound() {
        let (session, _rx, _c) = session_with_capacity("u_1", 8);
        let (_tx, stream) = transport::unbounded::<Result<Message, Infallible>>();
        let pump = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { run_inbound(session, stream, &config(), &Ignore).await })
        };

        let _ = session.close(CloseReason::SlowConsumer);
        assert_eq!(pump.await.unwrap(), CloseReason::SlowConsumer);
    }
}
