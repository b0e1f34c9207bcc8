//! Socket-owning transport client.
//!
//! A [`RealtimeClient`] owns at most one websocket to the relay and
//! multiplexes inbound frames to the [`Channel`]s registered on it, keyed by
//! wire topic. It is cheap to clone; every clone shares the same socket.
//!
//! # Socket lifecycle
//!
//! * The socket is opened lazily by the first channel subscribe, with a
//!   bounded connect timeout. Concurrent callers share one connect attempt.
//! * While open, a heartbeat frame goes to the `phoenix` topic on a fixed
//!   interval. Heartbeat failures are ignored; a dead socket shows up as a
//!   close.
//! * On an unexpected close with channels still registered, a single
//!   reconnect attempt is scheduled after a fixed delay and rescheduled on
//!   failure. On success every channel that still wants to be subscribed
//!   replays its join.
//! * When the last channel unregisters, the socket and every timer are torn
//!   down.
//!
//! Nothing is buffered while disconnected: [`RealtimeClient::send`] fails.
//!
//! # Locking
//!
//! The socket state sits behind a short-lived std mutex that is never held
//! while calling into a channel. Channels may call into the client while
//! holding their own lock, so the order is always channel, then client.

use crate::channel::{Channel, ChannelOptions};
use crate::config::{wire_topic, RealtimeConfig};
use crate::error::{RealtimeError, Result};
use crate::frame::{Frame, EVENT_HEARTBEAT, PHOENIX_TOPIC};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for the relay's channel protocol.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: RealtimeConfig,
    socket_url: String,
    channels: dashmap::DashMap<String, Channel>,
    next_ref: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
    connect_attempts: AtomicU64,
    state: Mutex<SocketState>,
}

#[derive(Default)]
struct SocketState {
    /// Sender feeding the writer task; `Some` exactly while the socket is open
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// Bumped on every attach and teardown so stale close events are ignored
    generation: u64,
    last_connect_error: Option<RealtimeError>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl SocketState {
    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }

    fn stop_reconnect(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

impl RealtimeClient {
    /// Creates a client for the configured relay.
    ///
    /// No socket is opened until a channel subscribes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: RealtimeConfig) -> Result<Self> {
        config.validate()?;
        let socket_url = config.socket_url()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                socket_url,
                channels: dashmap::DashMap::new(),
                next_ref: AtomicU64::new(1),
                connect_lock: tokio::sync::Mutex::new(()),
                connect_attempts: AtomicU64::new(0),
                state: Mutex::new(SocketState::default()),
            }),
        })
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Creates a channel for `name`. The `realtime:` prefix is added if
    /// missing. The channel is not registered until it subscribes.
    pub fn channel(&self, name: &str, options: ChannelOptions) -> Channel {
        Channel::new(self.clone(), wire_topic(name), options)
    }

    /// Returns `true` while a socket is open.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state)
            .outbound
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of channels currently registered.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Returns once an open socket exists.
    ///
    /// If none exists, one is opened with the configured connect timeout.
    /// A caller that waited on another caller's in-flight attempt receives
    /// that attempt's outcome instead of starting a second one.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::ConnectTimeout`] if the socket did not open in time,
    /// [`RealtimeError::Connect`] if it errored or closed first. No retry is
    /// made here.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let seen_attempts = self.inner.connect_attempts.load(Ordering::SeqCst);
        let _guard = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if self.inner.connect_attempts.load(Ordering::SeqCst) != seen_attempts {
            // A socket discarded for lack of channels is not a failure for
            // a caller that registered since; it opens its own.
            let shared = lock(&self.inner.state).last_connect_error.clone();
            if let Some(err) = shared.filter(|err| !matches!(err, RealtimeError::NotConnected)) {
                return Err(err);
            }
        }

        let result = self.open_socket().await;
        lock(&self.inner.state).last_connect_error = result.as_ref().err().cloned();
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn open_socket(&self) -> Result<()> {
        let connect_timeout = self.inner.config.connect_timeout;
        debug!("🔌 Opening realtime socket to {}", self.inner.config.base_url);

        let ws_stream = match timeout(connect_timeout, connect_async(self.inner.socket_url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                warn!("❌ Realtime socket failed to open: {}", e);
                return Err(RealtimeError::Connect(e.to_string()));
            }
            Err(_) => {
                warn!("⏱️ Realtime socket connect timed out");
                return Err(RealtimeError::ConnectTimeout(connect_timeout.as_millis() as u64));
            }
        };

        if !self.attach(ws_stream) {
            return Err(RealtimeError::NotConnected);
        }
        info!("✅ Realtime socket open");
        Ok(())
    }

    /// Wires a freshly opened socket into the client and replays joins.
    ///
    /// If every channel unregistered while the socket was opening, the
    /// socket is closed instead and `false` is returned.
    fn attach(&self, mut ws_stream: SocketStream) -> bool {
        {
            let mut state = lock(&self.inner.state);
            // Checked under the state lock: `unregister_channel` empties the
            // registry before taking it, so a later teardown sees this attach.
            if self.inner.channels.is_empty() {
                drop(state);
                debug!("🔌 No channels left, closing the socket that just opened");
                tokio::spawn(async move {
                    let _ = ws_stream.close(None).await;
                });
                return false;
            }

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            state.generation += 1;
            let generation = state.generation;

            // Writer: drains the outbound queue, closes the sink when every
            // sender is gone.
            let writer = tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if let Err(e) = ws_sender.send(message).await {
                        debug!("🔌 Realtime socket write failed: {}", e);
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Reader: routes text frames to channels, reports the close.
            let weak = Arc::downgrade(&self.inner);
            let pong_tx = tx.clone();
            let reader = tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let Some(client) = upgrade(&weak) else { return };
                            client.route(text.as_str());
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = pong_tx.send(Message::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            debug!("🔌 Relay closed the realtime socket");
                            break;
                        }
                        Err(e) => {
                            warn!("❌ Realtime socket error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                drop(pong_tx);
                if let Some(client) = upgrade(&weak) {
                    client.handle_close(generation);
                }
            });

            let heartbeat = self.spawn_heartbeat();

            for old in [state.reader.take(), state.writer.take()].into_iter().flatten() {
                old.abort();
            }
            state.stop_heartbeat();
            state.stop_reconnect();
            state.outbound = Some(tx);
            state.reader = Some(reader);
            state.writer = Some(writer);
            state.heartbeat = Some(heartbeat);
        }

        for channel in self.registered_channels() {
            channel.on_socket_open();
        }
        true
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(client) = upgrade(&weak) else { return };
                match client.send(PHOENIX_TOPIC, EVENT_HEARTBEAT, json!({}), None) {
                    Ok(reference) => trace!("💓 Heartbeat sent (ref {})", reference),
                    Err(e) => trace!("💓 Heartbeat skipped: {}", e),
                }
            }
        })
    }

    /// Sends one frame.
    ///
    /// Stamps the frame with the next correlation reference and, when given,
    /// the channel's join reference.
    ///
    /// # Arguments
    ///
    /// * `topic` - Wire topic, already prefixed
    /// * `event` - Protocol event name
    /// * `payload` - Frame payload
    /// * `join_ref` - Join reference of the sending channel, if any
    ///
    /// # Returns
    ///
    /// The reference assigned to the frame.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] if no socket is open.
    pub fn send(&self, topic: &str, event: &str, payload: Value, join_ref: Option<&str>) -> Result<String> {
        let state = lock(&self.inner.state);
        let tx = state.outbound.as_ref().ok_or(RealtimeError::NotConnected)?;

        let reference = self.inner.next_ref.fetch_add(1, Ordering::SeqCst).to_string();
        let frame = Frame {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.clone()),
            join_ref: join_ref.filter(|r| !r.is_empty()).map(str::to_string),
        };
        let text = serde_json::to_string(&frame)?;
        tx.send(Message::Text(text.into()))
            .map_err(|_| RealtimeError::NotConnected)?;

        trace!("📤 {} {} ref={}", topic, event, reference);
        Ok(reference)
    }

    /// Routes one inbound text frame to its channel.
    fn route(&self, text: &str) {
        let Some(frame) = Frame::parse(text) else {
            trace!("🗑️ Dropping unparseable frame");
            return;
        };
        if frame.topic.is_empty() || frame.topic == PHOENIX_TOPIC {
            return;
        }

        let channel = self.inner.channels.get(&frame.topic).map(|entry| entry.value().clone());
        match channel {
            Some(channel) => channel.handle_frame(&frame),
            None => trace!("🗑️ Dropping frame for unregistered topic {}", frame.topic),
        }
    }

    fn handle_close(&self, generation: u64) {
        {
            let mut state = lock(&self.inner.state);
            if state.generation != generation {
                return;
            }
            state.outbound = None;
            state.reader = None;
            state.writer = None;
            state.stop_heartbeat();
        }
        warn!("🔌 Realtime socket closed");

        for channel in self.registered_channels() {
            channel.on_socket_close();
        }
        if !self.inner.channels.is_empty() {
            self.schedule_reconnect();
        }
    }

    /// Schedules one reconnect attempt. A pending attempt is never stacked.
    fn schedule_reconnect(&self) {
        let mut state = lock(&self.inner.state);
        if state.reconnect.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.reconnect_delay;
        debug!("🔁 Reconnect scheduled in {} ms", delay.as_millis());
        state.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let Some(client) = upgrade(&weak) else { return };
            lock(&client.inner.state).reconnect = None;
            if client.inner.channels.is_empty() {
                return;
            }
            match client.ensure_connected().await {
                Ok(()) => info!("🔁 Realtime socket reconnected"),
                Err(e) => {
                    debug!("🔁 Reconnect failed: {}", e);
                    client.schedule_reconnect();
                }
            }
        }));
    }

    pub(crate) fn register_channel(&self, channel: &Channel) {
        self.inner
            .channels
            .insert(channel.topic().to_string(), channel.clone());
    }

    /// Removes `channel` from the registry and tears the socket down when
    /// the registry becomes empty.
    pub(crate) fn unregister_channel(&self, channel: &Channel) {
        self.inner
            .channels
            .remove_if(channel.topic(), |_, registered| registered.same_channel(channel));

        if !self.inner.channels.is_empty() {
            return;
        }

        let mut state = lock(&self.inner.state);
        state.generation += 1;
        state.outbound = None;
        state.writer = None;
        state.stop_heartbeat();
        state.stop_reconnect();
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        debug!("🔌 Last channel left, realtime socket torn down");
    }

    fn registered_channels(&self) -> Vec<Channel> {
        self.inner
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn upgrade(weak: &Weak<ClientInner>) -> Option<RealtimeClient> {
    weak.upgrade().map(|inner| RealtimeClient { inner })
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("base_url", &self.inner.config.base_url)
            .field("connected", &self.is_connected())
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RealtimeClient {
        RealtimeClient::new(RealtimeConfig::new("http://127.0.0.1:9", "anon")).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let err = RealtimeClient::new(RealtimeConfig::new("not a url", "k")).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidUrl(_)));
    }

    #[test]
    fn test_send_fails_while_disconnected() {
        let client = client();
        assert!(!client.is_connected());
        let err = client.send("realtime:x", "broadcast", json!({}), None).unwrap_err();
        assert_eq!(err, RealtimeError::NotConnected);
    }

    #[test]
    fn test_channel_topic_is_prefixed() {
        let client = client();
        let channel = client.channel("duel-ABCDEF", ChannelOptions::default());
        assert_eq!(channel.topic(), "realtime:duel-ABCDEF");
        // Not registered until subscribe.
        assert_eq!(client.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_refs_strictly_increase() {
        let client = client();
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&client.inner.state).outbound = Some(tx);

        let first = client.send("realtime:a", "broadcast", json!({}), Some("1")).unwrap();
        let second = client.send("phoenix", "heartbeat", json!({}), None).unwrap();
        assert!(second.parse::<u64>().unwrap() > first.parse::<u64>().unwrap());

        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected text frame");
        };
        let frame = Frame::parse(text.as_str()).unwrap();
        assert_eq!(frame.reference.as_deref(), Some(first.as_str()));
        assert_eq!(frame.join_ref.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let mut config = RealtimeConfig::new("http://127.0.0.1:1", "anon");
        config.connect_timeout = std::time::Duration::from_millis(500);
        let client = RealtimeClient::new(config).unwrap();
        let err = client.ensure_connected().await.unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::Connect(_) | RealtimeError::ConnectTimeout(_)
        ));
        assert!(!client.is_connected());
    }
}
