//! Per-connection handler
//!
//! A `ConnectionHandler` owns one `FramedConnection` and drives it with two
//! tasks:
//! - a receive loop that turns inbound frames into `HandlerEvent`s
//! - a write loop that drains a bounded outbound queue onto the stream
//!
//! The two halves of the stream never share a lock, so a handler can be read
//! from and written to concurrently. Events go to whoever owns the event
//! channel (the room actor, or an outbound session); the handler holds no
//! reference back to its owner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{CloseHandle, FramedConnection, FramedReadHalf, FramedWriteHalf};
use crate::error::SendError;
use crate::types::{AtomicHandlerState, HandlerId, HandlerState};

/// Events emitted by a handler's receive loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    /// A complete non-empty frame arrived
    Message {
        id: HandlerId,
        name: String,
        text: String,
    },
    /// The stream ended; emitted exactly once per handler
    Disconnected { id: HandlerId },
}

/// Settings shared by every handler
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Frames queued per peer before it is considered too slow
    pub outbound_queue_capacity: usize,
    /// Upper bound on writing a single frame
    pub send_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// One peer connection with its receive and write loops
#[derive(Debug)]
pub struct ConnectionHandler {
    id: HandlerId,
    name: String,
    outbound: mpsc::Sender<Arc<str>>,
    state: Arc<AtomicHandlerState>,
    closer: CloseHandle,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

impl ConnectionHandler {
    /// Take ownership of `connection` and start both loops
    pub fn spawn(
        id: HandlerId,
        name: impl Into<String>,
        connection: FramedConnection,
        events: mpsc::Sender<HandlerEvent>,
        config: &HandlerConfig,
    ) -> Self {
        let name = name.into();
        let peer_addr = connection.peer_addr();
        let (reader, writer, closer) = connection.into_parts();

        let state = Arc::new(AtomicHandlerState::new(HandlerState::Created));
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));

        state.store(HandlerState::Running);
        let read_task = tokio::spawn(receive_loop(
            id,
            name.clone(),
            reader,
            events,
            Arc::clone(&state),
            closer.clone(),
        ));
        let write_task = tokio::spawn(write_loop(
            id,
            writer,
            outbound_rx,
            closer.clone(),
            config.send_timeout,
        ));

        info!(%id, name = %name, peer = %peer_addr, "Handler started");

        Self {
            id,
            name,
            outbound,
            state,
            closer,
            read_task: Some(read_task),
            write_task: Some(write_task),
        }
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HandlerState {
        self.state.load()
    }

    /// True while the receive loop is running and stop was not requested
    pub fn is_active(&self) -> bool {
        self.state() == HandlerState::Running
    }

    /// Queue `text` for delivery to this peer
    ///
    /// Never waits. Sending to a stopped handler, or sending empty text, is
    /// a no-op. A peer whose queue is full is evicted.
    pub fn send(&self, text: impl Into<Arc<str>>) -> Result<(), SendError> {
        if !self.is_active() {
            return Ok(());
        }

        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }

        match self.outbound.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(id = %self.id, name = %self.name, "Outbound queue full, evicting peer");
                self.stop();
                Err(SendError::Backlogged { id: self.id })
            }
        }
    }

    /// Request shutdown
    ///
    /// Idempotent and safe to race with the peer closing. The receive loop
    /// reports the disconnect.
    pub fn stop(&self) {
        if self
            .state
            .transition(HandlerState::Running, HandlerState::Stopping)
        {
            debug!(id = %self.id, "Handler stopping");
        }
        self.closer.close();
    }

    /// Stop and wait for both loops to exit
    pub async fn join(mut self) {
        self.stop();

        for task in [self.read_task.take(), self.write_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                warn!(id = %self.id, error = %e, "Handler task failed");
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read frames until the stream ends, then report the disconnect once
async fn receive_loop(
    id: HandlerId,
    name: String,
    mut reader: FramedReadHalf,
    events: mpsc::Sender<HandlerEvent>,
    state: Arc<AtomicHandlerState>,
    closer: CloseHandle,
) {
    let mut closed = closer.subscribe();

    loop {
        match reader.receive().await {
            Ok(Some(text)) => {
                debug!(%id, bytes = text.len(), "Frame received");
                let event = HandlerEvent::Message {
                    id,
                    name: name.clone(),
                    text,
                };
                tokio::select! {
                    sent = events.send(event) => if sent.is_err() {
                        debug!(%id, "Event receiver closed, ending receive loop");
                        break;
                    },
                    () = closed.closed() => {
                        debug!(%id, "Closed while the event channel was full");
                        break;
                    }
                }
            }
            Ok(None) => {
                debug!(%id, "Stream ended");
                break;
            }
            Err(e) => {
                warn!(%id, error = %e, "Receive failed, closing connection");
                break;
            }
        }
    }

    state.store(HandlerState::Stopped);
    closer.close();

    info!(%id, name = %name, "Handler disconnected");
    report_disconnect(id, events);
}

/// Deliver the single `Disconnected` event without holding up shutdown
///
/// With the channel full, delivery moves to a detached task that finishes
/// once the owner drains the channel or drops it.
fn report_disconnect(id: HandlerId, events: mpsc::Sender<HandlerEvent>) {
    match events.try_send(HandlerEvent::Disconnected { id }) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            tokio::spawn(async move {
                let _ = events.send(event).await;
            });
        }
    }
}

/// Drain the outbound queue onto the stream with a per-frame deadline
async fn write_loop(
    id: HandlerId,
    mut writer: FramedWriteHalf,
    mut outbound: mpsc::Receiver<Arc<str>>,
    closer: CloseHandle,
    send_timeout: Duration,
) {
    let mut closed = closer.subscribe();

    loop {
        let text = tokio::select! {
            biased;
            () = closed.closed() => break,
            next = outbound.recv() => match next {
                Some(text) => text,
                None => break,
            },
        };

        match tokio::time::timeout(send_timeout, writer.send(&text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%id, error = %e, "Send failed, closing connection");
                closer.close();
                break;
            }
            Err(_) => {
                warn!(%id, timeout = ?send_timeout, "Send timed out, closing connection");
                closer.close();
                break;
            }
        }
    }

    writer.shutdown().await;
    debug!(%id, "Write loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{loopback_pair, raw_pair};
    use crate::types::MAX_FRAME_SIZE;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_handler(
        connection: FramedConnection,
    ) -> (ConnectionHandler, mpsc::Receiver<HandlerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let handler = ConnectionHandler::spawn(
            HandlerId(1),
            "peer",
            connection,
            tx,
            &HandlerConfig::default(),
        );
        (handler, rx)
    }

    /// Drain every remaining event once all senders are gone
    async fn drain(mut rx: mpsc::Receiver<HandlerEvent>) -> Vec<HandlerEvent> {
        let mut events = Vec::new();
        while let Some(event) = timeout(WAIT, rx.recv()).await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_inbound_frames_become_events() {
        let (server, mut client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, mut rx) = spawn_handler(server);

        client.send("hello").await.unwrap();

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            HandlerEvent::Message {
                id: HandlerId(1),
                name: "peer".to_string(),
                text: "hello".to_string(),
            }
        );
        assert!(handler.is_active());
    }

    #[tokio::test]
    async fn test_send_reaches_peer_in_order() {
        let (server, mut client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, _rx) = spawn_handler(server);

        handler.send("one").unwrap();
        handler.send(String::from("two")).unwrap();
        handler.send("three").unwrap();

        for expected in ["one", "two", "three"] {
            let text = timeout(WAIT, client.receive()).await.unwrap().unwrap();
            assert_eq!(text.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_peer_close_emits_single_disconnect() {
        let (server, client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, rx) = spawn_handler(server);

        drop(client);
        handler.join().await;

        let events = drain(rx).await;
        assert_eq!(events, vec![HandlerEvent::Disconnected { id: HandlerId(1) }]);
    }

    #[tokio::test]
    async fn test_double_stop_emits_single_disconnect() {
        let (server, _client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, rx) = spawn_handler(server);

        handler.stop();
        handler.stop();
        assert!(!handler.is_active());
        handler.join().await;

        let events = drain(rx).await;
        assert_eq!(events, vec![HandlerEvent::Disconnected { id: HandlerId(1) }]);
    }

    #[tokio::test]
    async fn test_stop_racing_peer_close_emits_single_disconnect() {
        let (server, client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, rx) = spawn_handler(server);

        let closer = tokio::spawn(async move { drop(client) });
        handler.stop();
        closer.await.unwrap();
        handler.join().await;

        let disconnects = drain(rx)
            .await
            .into_iter()
            .filter(|event| matches!(event, HandlerEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_send_after_stop_is_noop() {
        let (server, mut client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, _rx) = spawn_handler(server);

        handler.stop();
        assert_eq!(handler.send("ignored"), Ok(()));

        // Peer only sees the stream end
        let text = timeout(WAIT, client.receive()).await.unwrap().unwrap();
        assert_eq!(text, None);
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let (server, mut client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (handler, _rx) = spawn_handler(server);

        handler.send("").unwrap();
        handler.send("after").unwrap();

        let text = timeout(WAIT, client.receive()).await.unwrap().unwrap();
        assert_eq!(text.as_deref(), Some("after"));
        assert!(handler.is_active());
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_disconnects() {
        let (server, mut raw) = raw_pair(16).await;
        let (handler, mut rx) = spawn_handler(server);

        raw.write_all(&1000u32.to_be_bytes()).await.unwrap();

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, HandlerEvent::Disconnected { id: HandlerId(1) });
        assert_eq!(handler.state(), HandlerState::Stopped);
    }

    #[tokio::test]
    async fn test_send_timeout_disconnects_stalled_peer() {
        // The peer never reads, so a frame larger than the socket buffers
        // cannot finish writing.
        let (server, _client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (tx, mut rx) = mpsc::channel(32);
        let config = HandlerConfig {
            send_timeout: Duration::from_millis(200),
            ..HandlerConfig::default()
        };
        let handler = ConnectionHandler::spawn(HandlerId(3), "stalled", server, tx, &config);

        handler.send("x".repeat(16 * 1024 * 1024)).unwrap();

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event, HandlerEvent::Disconnected { id: HandlerId(3) });
        assert!(!handler.is_active());
    }

    #[tokio::test]
    async fn test_stop_with_full_event_channel() {
        let (server, mut client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (tx, mut rx) = mpsc::channel(2);
        let handler =
            ConnectionHandler::spawn(HandlerId(4), "busy", server, tx, &HandlerConfig::default());

        for i in 0..5 {
            client.send(&format!("frame {i}")).await.unwrap();
        }
        timeout(WAIT, async {
            while rx.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        timeout(WAIT, handler.join()).await.unwrap();

        // Queued messages stay in order, and the disconnect still arrives once
        let events = drain(rx).await;
        assert_eq!(
            events.last(),
            Some(&HandlerEvent::Disconnected { id: HandlerId(4) })
        );
        let disconnects = events
            .iter()
            .filter(|event| matches!(event, HandlerEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_peer() {
        let (server, _client) = loopback_pair(MAX_FRAME_SIZE).await;
        let (tx, _rx) = mpsc::channel(32);
        let config = HandlerConfig {
            outbound_queue_capacity: 1,
            ..HandlerConfig::default()
        };
        let handler = ConnectionHandler::spawn(HandlerId(9), "slow", server, tx, &config);

        // On the current-thread test runtime the write loop cannot run
        // between these calls, so the second one finds the queue full.
        handler.send("first").unwrap();
        assert_eq!(
            handler.send("second"),
            Err(SendError::Backlogged { id: HandlerId(9) })
        );
        assert!(!handler.is_active());
    }
}
