//! One client session: registration plus the read and write loops.
//!
//! The write loop is the only reader of the session's outbound queue. The
//! read loop is the only path that unregisters the session from the inbound
//! side. Either loop ending cancels the other.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::connection::{CloseReason, FrameReader, FrameWriter};
use super::messages::{InboundMessage, WelcomeMessage};
use crate::domain::SessionId;
use crate::error::HubError;
use crate::hub::Hub;

/// Per-session limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Capacity of the outbound queue. A session whose queue is full when
    /// the hub routes to it is shed.
    pub queue_capacity: usize,
    /// Maximum time without an outbound frame before the connection is
    /// closed with a `"timeout"` reason.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Runs a session to completion over the given connection halves.
///
/// Enqueues the welcome frame, registers with the hub, then drives both
/// loops. Returns the session id once the session has been unregistered.
pub async fn run_session<R, W>(
    hub: Hub,
    reader: R,
    writer: W,
    config: SessionConfig,
    parent: Span,
) -> SessionId
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let id = SessionId::new();
    let span = info_span!(parent: &parent, "session", session = %id);
    serve(hub, id, reader, writer, config)
        .instrument(span)
        .await;
    id
}

async fn serve<R, W>(hub: Hub, id: SessionId, reader: R, mut writer: W, config: SessionConfig)
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (queue, outbound) = mpsc::channel(config.queue_capacity.max(1));
    // Queued before registration so it is always the first frame out.
    let _ = queue.try_send(WelcomeMessage::new(id).to_frame());

    if hub.register(id, queue).await.is_err() {
        warn!("hub unavailable, refusing session");
        let _ = writer.close(CloseReason::Normal).await;
        return;
    }
    info!("session connected");

    let done = CancellationToken::new();
    let write_task = tokio::spawn(
        write_loop(writer, outbound, config.idle_timeout, done.clone()).in_current_span(),
    );

    read_loop(&hub, id, reader, &done).await;

    done.cancel();
    let _ = hub.unregister(id).await;
    let _ = write_task.await;
    info!("session disconnected");
}

async fn read_loop<R: FrameReader>(hub: &Hub, id: SessionId, mut reader: R, done: &CancellationToken) {
    loop {
        let frame = tokio::select! {
            () = done.cancelled() => return,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some(frame)) => {
                if dispatch(hub, id, frame).await.is_err() {
                    warn!("hub stopped, ending session");
                    return;
                }
            }
            Ok(None) => {
                debug!("peer closed connection");
                return;
            }
            Err(err) => {
                debug!(error = %err, "read failed");
                return;
            }
        }
    }
}

async fn dispatch(hub: &Hub, id: SessionId, frame: Bytes) -> Result<(), HubError> {
    match InboundMessage::decode(frame) {
        Ok(InboundMessage::Broadcast(content)) => hub.broadcast(content).await,
        Ok(InboundMessage::Raw(frame)) => {
            debug!(bytes = frame.len(), "untyped frame, broadcasting as-is");
            hub.broadcast(frame).await
        }
        Ok(InboundMessage::Direct { to, content }) => hub.direct(to, content).await,
        Ok(InboundMessage::Group { group, content }) => hub.send_to_group(group, content).await,
        Ok(InboundMessage::JoinGroup(group)) => hub.join_group(id, group).await,
        Ok(InboundMessage::LeaveGroup(group)) => hub.leave_group(id, group).await,
        Err(err) => {
            debug!(error = %err, "dropping unroutable frame");
            Ok(())
        }
    }
}

async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    idle_timeout: Duration,
    done: CancellationToken,
) {
    let reason = loop {
        let next = tokio::select! {
            () = done.cancelled() => break CloseReason::Normal,
            next = tokio::time::timeout(idle_timeout, outbound.recv()) => next,
        };
        match next {
            Ok(Some(frame)) => {
                if let Err(err) = writer.write_frame(frame).await {
                    debug!(error = %err, "write failed");
                    done.cancel();
                    return;
                }
            }
            Ok(None) => break CloseReason::Normal,
            Err(_) => {
                info!(idle_secs = idle_timeout.as_secs(), "session idle, closing");
                break CloseReason::IdleTimeout;
            }
        }
    };
    done.cancel();
    if let Err(err) = writer.close(reason).await {
        debug!(error = %err, "close failed");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::domain::GroupId;
    use crate::error::ConnectionError;
    use crate::hub::HubStats;

    #[derive(Debug, PartialEq)]
    enum Wire {
        Frame(Bytes),
        Closed(CloseReason),
    }

    struct ChannelReader(mpsc::UnboundedReceiver<Bytes>);

    #[async_trait]
    impl FrameReader for ChannelReader {
        async fn read_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
            Ok(self.0.recv().await)
        }
    }

    /// Reader whose connection has already failed.
    struct BrokenReader;

    #[async_trait]
    impl FrameReader for BrokenReader {
        async fn read_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
            Err(ConnectionError::Closed)
        }
    }

    struct ChannelWriter(mpsc::UnboundedSender<Wire>);

    #[async_trait]
    impl FrameWriter for ChannelWriter {
        async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
            self.0
                .send(Wire::Frame(frame))
                .map_err(|_| ConnectionError::Closed)
        }

        async fn close(&mut self, reason: CloseReason) -> Result<(), ConnectionError> {
            self.0
                .send(Wire::Closed(reason))
                .map_err(|_| ConnectionError::Closed)
        }
    }

    struct Peer {
        id: SessionId,
        inbound: mpsc::UnboundedSender<Bytes>,
        wire: mpsc::UnboundedReceiver<Wire>,
        task: JoinHandle<SessionId>,
    }

    impl Peer {
        fn send(&self, text: &str) {
            let Ok(()) = self.inbound.send(Bytes::copy_from_slice(text.as_bytes())) else {
                panic!("session reader gone");
            };
        }

        async fn next(&mut self) -> Wire {
            let Some(wire) = self.wire.recv().await else {
                panic!("session writer gone");
            };
            wire
        }
    }

    fn start_hub() -> (Hub, CancellationToken) {
        let (hub, hub_loop) = Hub::new(64, Span::none());
        let shutdown = CancellationToken::new();
        tokio::spawn(hub_loop.run(shutdown.clone()));
        (hub, shutdown)
    }

    async fn connect(hub: &Hub, config: SessionConfig) -> Peer {
        let (inbound, reader) = mpsc::unbounded_channel();
        let (writer, mut wire) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            hub.clone(),
            ChannelReader(reader),
            ChannelWriter(writer),
            config,
            Span::none(),
        ));
        let Some(Wire::Frame(welcome)) = wire.recv().await else {
            panic!("expected welcome frame");
        };
        let Ok(welcome) = serde_json::from_slice::<WelcomeMessage>(&welcome) else {
            panic!("welcome frame is not a WelcomeMessage");
        };
        Peer {
            id: welcome.client_id,
            inbound,
            wire,
            task,
        }
    }

    async fn stats(hub: &Hub) -> HubStats {
        let Ok(stats) = hub.stats().await else {
            panic!("hub closed");
        };
        stats
    }

    #[tokio::test]
    async fn welcome_is_first_and_session_is_registered() {
        let (hub, _shutdown) = start_hub();
        let peer = connect(&hub, SessionConfig::default()).await;
        assert_eq!(stats(&hub).await.sessions, 1);
        let Ok(groups) = hub.session_groups(peer.id).await else {
            panic!("hub closed");
        };
        assert_eq!(groups, Some(Vec::new()));
    }

    #[tokio::test]
    async fn plain_text_is_broadcast_to_everyone() {
        let (hub, _shutdown) = start_hub();
        let mut alice = connect(&hub, SessionConfig::default()).await;
        let mut bob = connect(&hub, SessionConfig::default()).await;

        alice.send("hello there");

        let expected = Wire::Frame(Bytes::from_static(b"hello there"));
        assert_eq!(alice.next().await, expected);
        assert_eq!(bob.next().await, expected);
    }

    #[tokio::test]
    async fn direct_reaches_only_addressee() {
        let (hub, _shutdown) = start_hub();
        let mut alice = connect(&hub, SessionConfig::default()).await;
        let mut bob = connect(&hub, SessionConfig::default()).await;

        alice
            .send(&format!(r#"{{"type":"direct","to":"{}","content":"hi bob"}}"#, bob.id));
        assert_eq!(bob.next().await, Wire::Frame(Bytes::from_static(b"hi bob")));

        alice.send(r#"{"type":"broadcast","content":"marker"}"#);
        assert_eq!(alice.next().await, Wire::Frame(Bytes::from_static(b"marker")));
    }

    #[tokio::test]
    async fn group_messages_follow_membership() {
        let (hub, _shutdown) = start_hub();
        let mut alice = connect(&hub, SessionConfig::default()).await;
        let mut bob = connect(&hub, SessionConfig::default()).await;
        let marker = |text: &'static str| Wire::Frame(Bytes::from_static(text.as_bytes()));

        // A broadcast from bob after his join proves the join was processed.
        bob.send(r#"{"type":"join_group","groupId":"lab"}"#);
        bob.send(r#"{"type":"broadcast","content":"joined"}"#);
        assert_eq!(bob.next().await, marker("joined"));
        assert_eq!(alice.next().await, marker("joined"));

        alice.send(r#"{"type":"group","groupId":"lab","content":"lab only"}"#);
        assert_eq!(bob.next().await, marker("lab only"));

        bob.send(r#"{"type":"leave_group","groupId":"lab"}"#);
        bob.send(r#"{"type":"broadcast","content":"left"}"#);
        assert_eq!(bob.next().await, marker("left"));
        assert_eq!(alice.next().await, marker("left"));

        let Some(lab) = GroupId::new("lab") else {
            panic!("valid group name");
        };
        let Ok(members) = hub.group_members(lab).await else {
            panic!("hub closed");
        };
        assert!(members.is_empty());

        alice.send(r#"{"type":"group","groupId":"lab","content":"nobody"}"#);
        alice.send(r#"{"type":"broadcast","content":"after"}"#);
        assert_eq!(alice.next().await, marker("after"));
        assert_eq!(bob.next().await, marker("after"));
    }

    #[tokio::test]
    async fn peer_close_unregisters_and_closes_writer() {
        let (hub, _shutdown) = start_hub();
        let Peer {
            id,
            inbound,
            mut wire,
            task,
        } = connect(&hub, SessionConfig::default()).await;

        drop(inbound);
        let Ok(finished) = task.await else {
            panic!("session task panicked");
        };
        assert_eq!(finished, id);
        assert_eq!(wire.recv().await, Some(Wire::Closed(CloseReason::Normal)));
        assert_eq!(stats(&hub).await.sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_closed_with_timeout() {
        let (hub, _shutdown) = start_hub();
        let config = SessionConfig {
            queue_capacity: 8,
            idle_timeout: Duration::from_secs(60),
        };
        let mut peer = connect(&hub, config).await;

        assert_eq!(peer.next().await, Wire::Closed(CloseReason::IdleTimeout));
        let Ok(_) = peer.task.await else {
            panic!("session task panicked");
        };
        assert_eq!(stats(&hub).await.sessions, 0);
    }

    #[tokio::test]
    async fn hub_shutdown_closes_session() {
        let (hub, shutdown) = start_hub();
        let mut peer = connect(&hub, SessionConfig::default()).await;
        shutdown.cancel();
        assert_eq!(peer.next().await, Wire::Closed(CloseReason::Normal));
    }

    #[tokio::test]
    async fn read_error_unregisters_and_closes_writer() {
        let (hub, _shutdown) = start_hub();
        let (writer, mut wire) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            hub.clone(),
            BrokenReader,
            ChannelWriter(writer),
            SessionConfig::default(),
            Span::none(),
        ));

        let Ok(Ok(_)) = tokio::time::timeout(Duration::from_secs(5), task).await else {
            panic!("session did not end after a read error");
        };
        assert_eq!(stats(&hub).await.sessions, 0);

        // The welcome may or may not have gone out; the close always does.
        let mut last = None;
        while let Some(frame) = wire.recv().await {
            last = Some(frame);
        }
        assert_eq!(last, Some(Wire::Closed(CloseReason::Normal)));
    }

    #[tokio::test]
    async fn write_error_ends_the_session() {
        let (hub, _shutdown) = start_hub();
        let Peer {
            id,
            inbound,
            wire,
            task,
        } = connect(&hub, SessionConfig::default()).await;
        assert_eq!(stats(&hub).await.sessions, 1);

        drop(wire);
        let Ok(()) = hub.broadcast(Bytes::from_static(b"unwritable")).await else {
            panic!("hub closed");
        };

        let Ok(Ok(finished)) = tokio::time::timeout(Duration::from_secs(5), task).await else {
            panic!("session did not end after a write error");
        };
        assert_eq!(finished, id);
        assert_eq!(stats(&hub).await.sessions, 0);
        drop(inbound);
    }
}
