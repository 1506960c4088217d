//! Connection lifecycle for the hosted realtime channel.
//!
//! The bridge owns the websocket session: connect, join the configured
//! topic, keep the session alive with heartbeats, decode inbound frames and
//! hand request broadcasts to the dispatcher. Every failure path lands back
//! in the disconnected state and the bridge retries forever after a fixed
//! delay; nothing here is fatal to the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{
    BroadcastPayload, RequestPayload, SocketMessage, BROADCAST_REQUEST, EVENT_BROADCAST,
    EVENT_CLOSE, EVENT_ERROR, EVENT_HEARTBEAT, EVENT_REPLY,
};
use crate::store::StateStore;

pub mod dispatcher;

pub use dispatcher::RequestDispatcher;

/// Shared handle onto the current channel session.
///
/// Cloned into the heartbeat task and every dispatcher invocation. The ref
/// counter and the outbound sender are session-scoped: [`begin`] installs a
/// fresh sender and resets the counter, [`end`] tears the sender down and
/// turns every later publish into a logged no-op.
///
/// [`begin`]: SessionHandle::begin
/// [`end`]: SessionHandle::end
#[derive(Clone)]
pub struct SessionHandle {
    topic: String,
    inner: Arc<SessionInner>,
}

struct SessionInner {
    next_ref: AtomicU64,
    joined: AtomicBool,
    outbound: RwLock<Option<mpsc::UnboundedSender<SocketMessage>>>,
}

impl SessionHandle {
    pub(crate) fn new(topic: String) -> Self {
        Self {
            topic,
            inner: Arc::new(SessionInner {
                next_ref: AtomicU64::new(1),
                joined: AtomicBool::new(false),
                outbound: RwLock::new(None),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Install the outbound sender for a new session; refs restart at 1.
    pub(crate) fn begin(&self, sender: mpsc::UnboundedSender<SocketMessage>) {
        self.inner.next_ref.store(1, Ordering::Release);
        self.inner.joined.store(false, Ordering::Release);
        *self.inner.outbound.write().unwrap() = Some(sender);
    }

    /// Drop the outbound sender; publishes become no-ops.
    pub(crate) fn end(&self) {
        self.inner.outbound.write().unwrap().take();
    }

    /// Next correlation ref, strictly increasing within the session.
    pub(crate) fn next_ref(&self) -> String {
        self.inner.next_ref.fetch_add(1, Ordering::AcqRel).to_string()
    }

    /// Record the join acknowledgment; true only the first time.
    pub(crate) fn note_joined(&self) -> bool {
        !self.inner.joined.swap(true, Ordering::AcqRel)
    }

    /// Queue a raw frame for sending. Returns false when disconnected or
    /// when the sender task has already gone away.
    pub(crate) fn send(&self, message: SocketMessage) -> bool {
        let outbound = self.inner.outbound.read().unwrap();
        match outbound.as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Publish a payload as a named broadcast event on the session topic.
    ///
    /// Best-effort by design: while disconnected there is nowhere to send,
    /// so the frame is dropped with a debug log.
    pub fn publish<T: Serialize>(&self, event: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!(event, "failed to serialize broadcast payload: {e}");
                return;
            }
        };
        let frame = SocketMessage::broadcast(&self.topic, event, payload, self.next_ref());
        if !self.send(frame) {
            debug!(event, "not connected, dropping broadcast");
        }
    }
}

/// Long-lived bridge between the realtime channel and the local store.
pub struct ChannelBridge {
    config: BridgeConfig,
    session: SessionHandle,
    dispatcher: RequestDispatcher,
}

impl ChannelBridge {
    pub fn new(config: BridgeConfig, store: Arc<StateStore>) -> Self {
        let session = SessionHandle::new(config.topic());
        let dispatcher = RequestDispatcher::new(store, session.clone(), config.slow_request_ms);
        Self {
            config,
            session,
            dispatcher,
        }
    }

    /// Handle onto the current session, mainly for embedding and tests.
    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Run the connect/join/receive loop forever, reconnecting after a
    /// fixed delay on any failure. No caller waits on connection
    /// establishment, so unbounded retry is the right liveness trade.
    pub async fn run(&self) {
        loop {
            match self.run_once().await {
                Ok(()) => {
                    warn!(channel = %self.config.channel, "session ended, reconnecting");
                }
                Err(e) => {
                    warn!(
                        channel = %self.config.channel,
                        delay_s = self.config.reconnect_secs,
                        "connection dropped ({e}), retrying"
                    );
                }
            }
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    /// One session: connect, join, pump frames until the socket dies.
    async fn run_once(&self) -> BridgeResult<()> {
        let url = self.config.socket_url()?;
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = self.config.max_frame_bytes;
        ws_config.max_frame_size = self.config.max_frame_bytes;

        info!(channel = %self.config.channel, "connecting");
        let (socket, _) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                .await
                .map_err(|e| BridgeError::Transport(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<SocketMessage>();
        self.session.begin(tx);

        // Drains the outbound queue onto the socket. A send failure ends
        // the task, which in turn fails every later queue send.
        let sender_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("failed to encode outbound frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("websocket send failed: {e}");
                    break;
                }
            }
        });

        // Join is fire-and-forget; the phx_reply ack is observed in the
        // receive loop, never blocked on.
        self.session
            .send(SocketMessage::join(&self.topic(), self.session.next_ref()));

        let heartbeat_task = {
            let session = self.session.clone();
            let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
            tokio::spawn(async move {
                // interval fires immediately; the first heartbeat should
                // wait a full period after join.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !session.send(SocketMessage::heartbeat(session.next_ref())) {
                        warn!("failed to send heartbeat, ending session");
                        break;
                    }
                    debug!(topic = %session.topic(), "heartbeat");
                }
            })
        };

        let result = loop {
            match read.next().await {
                Some(Ok(Message::Text(raw))) => self.handle_frame(&raw),
                Some(Ok(Message::Close(_))) => {
                    break Err(BridgeError::Transport("server closed connection".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(BridgeError::Transport(e.to_string())),
                None => break Err(BridgeError::Transport("socket stream ended".into())),
            }
        };

        self.session.end();
        heartbeat_task.abort();
        sender_task.abort();
        info!(channel = %self.config.channel, "disconnected");
        result
    }

    fn topic(&self) -> String {
        self.config.topic()
    }

    /// Decode one inbound frame and route it. Malformed frames are logged
    /// and dropped; they never abort the session.
    fn handle_frame(&self, raw: &str) {
        let message = match SocketMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("invalid inbound frame: {e}");
                return;
            }
        };

        match message.event.as_str() {
            EVENT_REPLY => {
                if message.topic == self.session.topic() && self.session.note_joined() {
                    info!(channel = %self.config.channel, "joined channel");
                }
            }
            EVENT_CLOSE | EVENT_ERROR => {
                warn!(event = %message.event, topic = %message.topic, "socket event");
            }
            EVENT_BROADCAST => self.handle_broadcast(message.payload),
            EVENT_HEARTBEAT => {}
            other => debug!(event = other, "ignoring frame"),
        }
    }

    fn handle_broadcast(&self, payload: serde_json::Value) {
        let broadcast: BroadcastPayload = match serde_json::from_value(payload) {
            Ok(broadcast) => broadcast,
            Err(e) => {
                warn!("malformed broadcast payload: {e}");
                return;
            }
        };
        if broadcast.event != BROADCAST_REQUEST {
            debug!(event = %broadcast.event, "ignoring broadcast");
            return;
        }
        let request: RequestPayload = match serde_json::from_value(broadcast.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed request payload: {e}");
                return;
            }
        };
        // One task per request; requests are independent and unordered.
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle(request).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EVENT_JOIN;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    async fn recv_frame(socket: &mut WebSocketStream<TcpStream>) -> SocketMessage {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(raw) = message {
                return SocketMessage::decode(&raw).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_connection_drop_reconnects_once_after_delay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = BridgeConfig {
            endpoint: format!("http://{addr}"),
            api_key: "test-key".into(),
            channel: "test".into(),
            reconnect_secs: 1,
            ..Default::default()
        };
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let bridge = Arc::new(ChannelBridge::new(config, store));
        let bridge_task = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };

        // First session: the bridge joins its topic on ref 1, then the
        // server drops the socket mid-session.
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let join = recv_frame(&mut socket).await;
        assert_eq!(join.event, EVENT_JOIN);
        assert_eq!(join.topic, "realtime:test");
        assert_eq!(join.reference.as_deref(), Some("1"));
        drop(socket);
        let dropped_at = Instant::now();

        // One reconnect arrives, and only after the configured delay.
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("bridge never reconnected")
            .unwrap();
        let elapsed = dropped_at.elapsed();
        assert!(
            elapsed >= Duration::from_millis(900),
            "reconnected too early: {elapsed:?}"
        );
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        // Fresh session, fresh ref sequence: a single join back on ref 1,
        // not a continuation of the old counter.
        let join = recv_frame(&mut socket).await;
        assert_eq!(join.event, EVENT_JOIN);
        assert_eq!(join.reference.as_deref(), Some("1"));

        // While the new session is live there are no further attempts.
        let extra = tokio::time::timeout(Duration::from_millis(1500), listener.accept()).await;
        assert!(extra.is_err(), "unexpected extra reconnect");

        drop(socket);
        bridge_task.abort();
    }

    #[tokio::test]
    async fn test_inbound_request_frame_is_answered_over_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = BridgeConfig {
            endpoint: format!("http://{addr}"),
            api_key: "test-key".into(),
            channel: "test".into(),
            ..Default::default()
        };
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let bridge = Arc::new(ChannelBridge::new(config, store.clone()));
        let bridge_task = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };

        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let join = recv_frame(&mut socket).await;
        assert_eq!(join.event, EVENT_JOIN);

        let request = serde_json::json!({
            "topic": "realtime:test",
            "event": "broadcast",
            "payload": {
                "type": "broadcast",
                "event": "request",
                "payload": {
                    "request_id": "req-1",
                    "client_id": "c-1",
                    "op": "set",
                    "path": "rooms/a",
                    "payload": {"value": 7}
                }
            },
            "ref": null
        });
        socket
            .send(Message::Text(request.to_string()))
            .await
            .unwrap();

        // Response first, then the change notification for the write.
        let response = recv_frame(&mut socket).await;
        assert_eq!(response.event, EVENT_BROADCAST);
        assert_eq!(response.payload["event"], "response");
        assert_eq!(response.payload["payload"]["request_id"], "req-1");
        assert_eq!(response.payload["payload"]["status"], "ok");

        let change = recv_frame(&mut socket).await;
        assert_eq!(change.payload["event"], "change");
        assert_eq!(change.payload["payload"]["path"], "rooms/a");
        assert_eq!(change.payload["payload"]["op"], "set");

        let stored = store.apply("read", "rooms/a", &json!({})).unwrap();
        assert_eq!(stored["value"], json!(7));

        drop(socket);
        bridge_task.abort();
    }

    #[test]
    fn test_refs_are_monotonic_and_reset_per_session() {
        let session = SessionHandle::new("realtime:test".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();
        session.begin(tx);
        assert_eq!(session.next_ref(), "1");
        assert_eq!(session.next_ref(), "2");
        assert_eq!(session.next_ref(), "3");

        session.end();
        let (tx, _rx) = mpsc::unbounded_channel();
        session.begin(tx);
        assert_eq!(session.next_ref(), "1");
    }

    #[test]
    fn test_publish_while_disconnected_is_noop() {
        let session = SessionHandle::new("realtime:test".to_string());
        // No session has begun; nothing to assert beyond "does not panic".
        session.publish("response", &json!({"request_id": "r"}));
        assert!(!session.send(SocketMessage::heartbeat("1".into())));
    }

    #[test]
    fn test_publish_wraps_in_broadcast_envelope() {
        let session = SessionHandle::new("realtime:test".to_string());
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.begin(tx);

        session.publish("change", &json!({"path": "a", "op": "set"}));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.topic, "realtime:test");
        assert_eq!(frame.event, EVENT_BROADCAST);
        assert_eq!(frame.payload["type"], "broadcast");
        assert_eq!(frame.payload["event"], "change");
        assert_eq!(frame.payload["payload"]["path"], "a");
        assert_eq!(frame.reference.as_deref(), Some("1"));
    }

    #[test]
    fn test_join_ack_noted_once() {
        let session = SessionHandle::new("realtime:test".to_string());
        let (tx, _rx) = mpsc::unbounded_channel();
        session.begin(tx);
        assert!(session.note_joined());
        assert!(!session.note_joined());

        // A fresh session logs the join again.
        session.end();
        let (tx, _rx) = mpsc::unbounded_channel();
        session.begin(tx);
        assert!(session.note_joined());
    }
}
