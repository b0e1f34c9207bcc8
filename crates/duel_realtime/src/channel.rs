//! Joinable channel on top of a [`RealtimeClient`].
//!
//! A channel owns the join/leave handshake for one topic, its presence
//! table, and the listeners that receive presence syncs and broadcasts.
//! Status changes are reported through the callback given to
//! [`Channel::subscribe`].

use crate::error::{RealtimeError, Result};
use crate::frame::{
    broadcast_payload, join_payload, track_payload, Frame, EVENT_BROADCAST, EVENT_CLOSE,
    EVENT_ERROR, EVENT_JOIN, EVENT_LEAVE, EVENT_PRESENCE_DIFF, EVENT_PRESENCE_STATE, EVENT_REPLY,
    EVENT_TRACK, EVENT_UNTRACK,
};
use crate::presence::{PresenceSnapshot, PresenceTable};
use crate::transport::{lock, RealtimeClient};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Status reported to the subscribe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
            ChannelStatus::Closed => "CLOSED",
        };
        f.write_str(text)
    }
}

/// Join options sent in the `phx_join` config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    /// Whether the relay echoes this client's broadcasts back to it
    pub broadcast_self: bool,
    /// Presence key this client tracks under (its participant id)
    pub presence_key: String,
}

/// Kind of listener registered with [`Channel::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Presence,
    Broadcast,
}

/// Event filter of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    Any,
    Exact(String),
}

impl EventFilter {
    pub fn exact(event: impl Into<String>) -> Self {
        EventFilter::Exact(event.into())
    }

    fn matches(&self, event: &str) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Exact(expected) => expected == event,
        }
    }
}

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The presence table changed; carries the table after the change
    PresenceSync(PresenceSnapshot),
    /// A user broadcast from another client (or this one, with self-broadcast)
    Broadcast { event: String, payload: Value },
}

/// Presence listeners filter on this event name.
pub const PRESENCE_SYNC: &str = "sync";

pub type StatusCallback = Arc<dyn Fn(ChannelStatus) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct Listener {
    kind: ListenerKind,
    filter: EventFilter,
    callback: EventCallback,
}

/// A subscription to one topic.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    client: RealtimeClient,
    topic: String,
    options: ChannelOptions,
    state: Mutex<ChannelState>,
}

#[derive(Default)]
struct ChannelState {
    should_be_subscribed: bool,
    joined: bool,
    closed: bool,
    /// Reference of the join in flight or completed; cleared on socket close
    join_ref: Option<String>,
    presence: PresenceTable,
    listeners: Vec<Arc<Listener>>,
    status_callback: Option<StatusCallback>,
    join_timer: Option<JoinHandle<()>>,
}

impl ChannelState {
    fn clear_join_timer(&mut self) {
        if let Some(timer) = self.join_timer.take() {
            timer.abort();
        }
    }
}

impl Channel {
    pub(crate) fn new(client: RealtimeClient, topic: String, options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                client,
                topic,
                options,
                state: Mutex::new(ChannelState::default()),
            }),
        }
    }

    /// Wire topic of this channel, including the `realtime:` prefix.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn is_joined(&self) -> bool {
        let state = lock(&self.inner.state);
        state.joined && !state.closed
    }

    pub(crate) fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a listener. Listeners of the matching kind whose filter
    /// matches run in registration order.
    ///
    /// Presence listeners match the event name `"sync"`.
    pub fn on<F>(&self, kind: ListenerKind, filter: EventFilter, callback: F) -> &Self
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.state).listeners.push(Arc::new(Listener {
            kind,
            filter,
            callback: Arc::new(callback),
        }));
        self
    }

    /// Subscribes the channel.
    ///
    /// Marks the channel as wanted, registers it with the client and joins
    /// once the socket is open. The outcome arrives through `callback`:
    /// `Subscribed` on an ok reply, `ChannelError` on a failed connect or
    /// reply, `TimedOut` if no reply arrives within the join timeout. Calling
    /// it again while joined only replaces the callback.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(ChannelStatus) + Send + Sync + 'static,
    {
        {
            let mut state = lock(&self.inner.state);
            state.status_callback = Some(Arc::new(callback));
            if state.joined && state.should_be_subscribed && !state.closed {
                return;
            }
            state.closed = false;
            state.should_be_subscribed = true;
        }

        self.inner.client.register_channel(self);
        debug!("📡 Subscribing to {}", self.inner.topic);

        let channel = self.clone();
        tokio::spawn(async move {
            match channel.inner.client.ensure_connected().await {
                Ok(()) => channel.join_if_idle(),
                Err(e) => {
                    warn!("❌ Channel {} could not connect: {}", channel.inner.topic, e);
                    channel.notify_status(ChannelStatus::ChannelError);
                }
            }
        });
    }

    /// Joins unless a join is already in flight or complete. Opening the
    /// socket replays joins on its own, so the subscribe path defers to it.
    fn join_if_idle(&self) {
        let idle = {
            let state = lock(&self.inner.state);
            state.join_ref.is_none() && !state.joined
        };
        if idle {
            self.join();
        }
    }

    /// Sends `phx_join` with a fresh reference and arms the join timer.
    fn join(&self) {
        let failed = {
            let mut state = lock(&self.inner.state);
            if !state.should_be_subscribed || state.closed || !self.inner.client.is_connected() {
                return;
            }
            state.joined = false;
            state.clear_join_timer();

            let payload = join_payload(self.inner.options.broadcast_self, &self.inner.options.presence_key);
            match self.inner.client.send(&self.inner.topic, EVENT_JOIN, payload, None) {
                Ok(reference) => {
                    trace!("🤝 Join sent for {} (ref {})", self.inner.topic, reference);
                    state.join_timer = Some(self.spawn_join_timer(reference.clone()));
                    state.join_ref = Some(reference);
                    false
                }
                Err(e) => {
                    warn!("❌ Join for {} not sent: {}", self.inner.topic, e);
                    true
                }
            }
        };
        if failed {
            self.notify_status(ChannelStatus::ChannelError);
        }
    }

    fn spawn_join_timer(&self, reference: String) -> JoinHandle<()> {
        let weak: Weak<ChannelInner> = Arc::downgrade(&self.inner);
        let join_timeout = self.inner.client.config().join_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(join_timeout).await;
            let Some(inner) = weak.upgrade() else { return };
            let channel = Channel { inner };
            let timed_out = {
                let mut state = lock(&channel.inner.state);
                let pending = !state.joined && state.join_ref.as_deref() == Some(reference.as_str());
                if pending {
                    state.join_timer = None;
                }
                pending
            };
            if timed_out {
                warn!("⏱️ Join for {} timed out", channel.inner.topic);
                channel.notify_status(ChannelStatus::TimedOut);
            }
        })
    }

    /// Applies one inbound frame addressed to this channel.
    pub(crate) fn handle_frame(&self, frame: &Frame) {
        match frame.event.as_str() {
            EVENT_REPLY => self.handle_reply(frame),
            EVENT_PRESENCE_STATE => {
                let snapshot = {
                    let mut state = lock(&self.inner.state);
                    state.presence.apply_state(&frame.payload);
                    state.presence.snapshot()
                };
                self.dispatch(ListenerKind::Presence, PRESENCE_SYNC, ChannelEvent::PresenceSync(snapshot));
            }
            EVENT_PRESENCE_DIFF => {
                let snapshot = {
                    let mut state = lock(&self.inner.state);
                    if !state.presence.apply_diff(&frame.payload) {
                        trace!("🗑️ Presence diff before first sync on {}", self.inner.topic);
                        return;
                    }
                    state.presence.snapshot()
                };
                self.dispatch(ListenerKind::Presence, PRESENCE_SYNC, ChannelEvent::PresenceSync(snapshot));
            }
            EVENT_BROADCAST => {
                let (event, payload) = frame.broadcast_parts();
                let channel_event = ChannelEvent::Broadcast {
                    event: event.to_string(),
                    payload: payload.clone(),
                };
                self.dispatch(ListenerKind::Broadcast, event, channel_event);
            }
            EVENT_ERROR => {
                lock(&self.inner.state).joined = false;
                warn!("❌ Relay reported an error on {}", self.inner.topic);
                self.notify_status(ChannelStatus::ChannelError);
            }
            EVENT_CLOSE => debug!("🔌 Relay closed {}", self.inner.topic),
            other => trace!("🗑️ Unhandled event {} on {}", other, self.inner.topic),
        }
    }

    fn handle_reply(&self, frame: &Frame) {
        let status = {
            let mut state = lock(&self.inner.state);
            let matches_join = state.join_ref.is_some() && frame.reference == state.join_ref;
            if !matches_join || state.joined {
                return;
            }
            state.clear_join_timer();
            if frame.reply_status() == Some("ok") {
                state.joined = true;
                ChannelStatus::Subscribed
            } else {
                state.joined = false;
                ChannelStatus::ChannelError
            }
        };

        match status {
            ChannelStatus::Subscribed => info!("✅ Joined {}", self.inner.topic),
            _ => warn!("❌ Join for {} rejected", self.inner.topic),
        }
        self.notify_status(status);
    }

    /// Sends a user broadcast. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotJoined`] before the join completes,
    /// [`RealtimeError::InvalidMessage`] for an empty event name, or the
    /// transport's error if the socket is gone.
    pub fn broadcast(&self, event: &str, payload: Value) -> Result<()> {
        if event.is_empty() {
            return Err(RealtimeError::InvalidMessage("broadcast event name is empty".to_string()));
        }
        self.push_joined(EVENT_BROADCAST, broadcast_payload(event, payload))
    }

    /// Tracks this client's presence metadata.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotJoined`] before the join completes.
    pub fn track(&self, meta: Value) -> Result<()> {
        self.push_joined(EVENT_TRACK, track_payload(meta))
    }

    /// Removes this client's presence metadata. A no-op when not joined.
    pub fn untrack(&self) -> Result<()> {
        if !self.is_joined() {
            return Ok(());
        }
        self.push_joined(EVENT_UNTRACK, json!({}))
    }

    fn push_joined(&self, event: &str, payload: Value) -> Result<()> {
        let state = lock(&self.inner.state);
        if !state.joined || state.closed {
            return Err(RealtimeError::NotJoined(self.inner.topic.clone()));
        }
        self.inner
            .client
            .send(&self.inner.topic, event, payload, state.join_ref.as_deref())?;
        Ok(())
    }

    /// Leaves the channel.
    ///
    /// Cancels the join timer, sends `phx_leave` if the socket is open,
    /// unregisters from the client (which closes the socket if this was the
    /// last channel) and reports `Closed`.
    pub fn unsubscribe(&self) {
        let callback = {
            let mut state = lock(&self.inner.state);
            let was_wanted = state.should_be_subscribed;
            state.should_be_subscribed = false;
            state.joined = false;
            state.closed = true;
            state.clear_join_timer();

            if self.inner.client.is_connected() {
                if let Err(e) = self.inner.client.send(
                    &self.inner.topic,
                    EVENT_LEAVE,
                    json!({}),
                    state.join_ref.as_deref(),
                ) {
                    debug!("🔌 Leave for {} not sent: {}", self.inner.topic, e);
                }
            }
            state.join_ref = None;
            state.presence.clear();
            if was_wanted {
                state.status_callback.take()
            } else {
                None
            }
        };

        self.inner.client.unregister_channel(self);
        info!("👋 Left {}", self.inner.topic);
        if let Some(callback) = callback {
            callback(ChannelStatus::Closed);
        }
    }

    /// Returns a copy of the presence table.
    pub fn presence_state(&self) -> PresenceSnapshot {
        lock(&self.inner.state).presence.snapshot()
    }

    pub(crate) fn on_socket_open(&self) {
        let wanted = {
            let state = lock(&self.inner.state);
            state.should_be_subscribed && !state.closed
        };
        if wanted {
            self.join();
        }
    }

    pub(crate) fn on_socket_close(&self) {
        let report = {
            let mut state = lock(&self.inner.state);
            state.joined = false;
            state.join_ref = None;
            state.clear_join_timer();
            // Keep the last known table but require a fresh sync before diffs.
            state.presence.mark_stale();
            state.should_be_subscribed && !state.closed
        };
        if report {
            self.notify_status(ChannelStatus::ChannelError);
        }
    }

    fn notify_status(&self, status: ChannelStatus) {
        let callback = lock(&self.inner.state).status_callback.clone();
        if let Some(callback) = callback {
            callback(status);
        }
    }

    fn dispatch(&self, kind: ListenerKind, event: &str, channel_event: ChannelEvent) {
        let listeners: Vec<Arc<Listener>> = lock(&self.inner.state)
            .listeners
            .iter()
            .filter(|listener| listener.kind == kind && listener.filter.matches(event))
            .cloned()
            .collect();
        for listener in listeners {
            (listener.callback)(&channel_event);
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.inner.topic)
            .field("joined", &self.is_joined())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn channel() -> Channel {
        let client = RealtimeClient::new(RealtimeConfig::new("http://127.0.0.1:9", "anon")).unwrap();
        client.channel(
            "duel-TEST01",
            ChannelOptions {
                broadcast_self: false,
                presence_key: "me".to_string(),
            },
        )
    }

    fn frame(event: &str, payload: Value) -> Frame {
        Frame::new("realtime:duel-TEST01", event, payload)
    }

    fn record_statuses(channel: &Channel) -> Arc<Mutex<Vec<ChannelStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        lock(&channel.inner.state).status_callback =
            Some(Arc::new(move |status: ChannelStatus| sink.lock().unwrap().push(status)));
        seen
    }

    #[test]
    fn test_broadcast_requires_join() {
        let channel = channel();
        let err = channel.broadcast("state", json!({})).unwrap_err();
        assert_eq!(err, RealtimeError::NotJoined("realtime:duel-TEST01".to_string()));
        assert!(channel.track(json!({"name": "A"})).is_err());
        assert!(channel.untrack().is_ok());
    }

    #[test]
    fn test_reply_matching_join_ref_subscribes() {
        let channel = channel();
        let seen = record_statuses(&channel);
        lock(&channel.inner.state).join_ref = Some("4".to_string());

        let mut stale = frame(EVENT_REPLY, json!({"status": "ok"}));
        stale.reference = Some("3".to_string());
        channel.handle_frame(&stale);
        assert!(!channel.is_joined());

        let mut reply = frame(EVENT_REPLY, json!({"status": "ok", "response": {}}));
        reply.reference = Some("4".to_string());
        channel.handle_frame(&reply);
        assert!(channel.is_joined());
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::Subscribed]);
    }

    #[test]
    fn test_error_reply_reports_channel_error() {
        let channel = channel();
        let seen = record_statuses(&channel);
        lock(&channel.inner.state).join_ref = Some("2".to_string());

        let mut reply = frame(EVENT_REPLY, json!({"status": "error", "response": {"reason": "nope"}}));
        reply.reference = Some("2".to_string());
        channel.handle_frame(&reply);
        assert!(!channel.is_joined());
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::ChannelError]);
    }

    #[test]
    fn test_listeners_filter_and_order() {
        let channel = channel();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (tag, filter) in [
            ("any", EventFilter::Any),
            ("state", EventFilter::exact("state")),
            ("hello", EventFilter::exact("hello")),
        ] {
            let order = order.clone();
            channel.on(ListenerKind::Broadcast, filter, move |_| order.lock().unwrap().push(tag));
        }
        let presence_hits = Arc::new(AtomicUsize::new(0));
        let hits = presence_hits.clone();
        channel.on(ListenerKind::Presence, EventFilter::exact(PRESENCE_SYNC), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        channel.handle_frame(&frame(
            EVENT_BROADCAST,
            json!({"type": "broadcast", "event": "state", "payload": {"score": 1}}),
        ));
        assert_eq!(*order.lock().unwrap(), vec!["any", "state"]);
        assert_eq!(presence_hits.load(Ordering::SeqCst), 0);

        channel.handle_frame(&frame(EVENT_PRESENCE_STATE, json!({"a": [{"phx_ref": "1"}]})));
        assert_eq!(presence_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_presence_diff_before_sync_is_silent() {
        let channel = channel();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        channel.on(ListenerKind::Presence, EventFilter::Any, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        channel.handle_frame(&frame(
            EVENT_PRESENCE_DIFF,
            json!({"joins": {"a": [{"phx_ref": "1"}]}, "leaves": {}}),
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(channel.presence_state().is_empty());
    }

    #[test]
    fn test_socket_close_requires_fresh_sync() {
        let channel = channel();
        let seen = record_statuses(&channel);
        {
            let mut state = lock(&channel.inner.state);
            state.should_be_subscribed = true;
            state.joined = true;
            state.join_ref = Some("1".to_string());
        }
        channel.handle_frame(&frame(EVENT_PRESENCE_STATE, json!({"a": [{"phx_ref": "1"}]})));

        channel.on_socket_close();
        assert!(!channel.is_joined());
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::ChannelError]);

        channel.handle_frame(&frame(
            EVENT_PRESENCE_DIFF,
            json!({"joins": {"b": [{"phx_ref": "2"}]}, "leaves": {}}),
        ));
        assert_eq!(channel.presence_state().keys().cloned().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_phx_error_unjoins() {
        let channel = channel();
        let seen = record_statuses(&channel);
        lock(&channel.inner.state).joined = true;
        channel.handle_frame(&frame(EVENT_ERROR, json!({})));
        assert!(!channel.is_joined());
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::ChannelError]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timer_reports_timeout() {
        let channel = channel();
        let seen = record_statuses(&channel);
        let timer = {
            let mut state = lock(&channel.inner.state);
            state.join_ref = Some("9".to_string());
            channel.spawn_join_timer("9".to_string())
        };

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert!(seen.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        timer.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::TimedOut]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timer_quiet_after_reply() {
        let channel = channel();
        let seen = record_statuses(&channel);
        lock(&channel.inner.state).join_ref = Some("5".to_string());
        let timer = channel.spawn_join_timer("5".to_string());

        let mut reply = frame(EVENT_REPLY, json!({"status": "ok"}));
        reply.reference = Some("5".to_string());
        channel.handle_frame(&reply);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let _ = timer.await;
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::Subscribed]);
    }

    #[test]
    fn test_unsubscribe_reports_closed() {
        let channel = channel();
        let seen = record_statuses(&channel);
        lock(&channel.inner.state).should_be_subscribed = true;
        channel.unsubscribe();
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::Closed]);
        assert!(channel.broadcast("state", json!({})).is_err());
    }
}
