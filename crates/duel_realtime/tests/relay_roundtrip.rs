//! End-to-end tests against a minimal in-process relay.
//!
//! The relay speaks just enough of the channel protocol for the client:
//! join replies, presence state/diffs, broadcast fan-out, heartbeat replies,
//! leave, and a way to drop every connection to exercise reconnects. It can
//! also stall websocket handshakes or refuse connections outright.

use duel_realtime::{
    ChannelEvent, ChannelOptions, ChannelStatus, EventFilter, ListenerKind, RealtimeClient,
    RealtimeConfig, RealtimeError,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct JoinConfig {
    key: String,
    echo: bool,
}

struct Peer {
    tx: mpsc::UnboundedSender<Message>,
    topics: HashMap<String, JoinConfig>,
}

#[derive(Default)]
struct RelayState {
    next_peer: AtomicUsize,
    peers: Mutex<HashMap<usize, Peer>>,
    /// topic -> presence key -> (owning peer, meta)
    presence: Mutex<HashMap<String, HashMap<String, (usize, Value)>>>,
    heartbeats: AtomicUsize,
    joins: AtomicUsize,
    closes: AtomicUsize,
    /// Delay before answering a websocket handshake
    handshake_delay_ms: AtomicU64,
    /// Drop new TCP connections without a handshake while set
    refuse: AtomicBool,
    refused: AtomicUsize,
}

impl RelayState {
    fn push(&self, peer: usize, topic: &str, event: &str, payload: Value, reference: Value) {
        let peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.get(&peer) {
            let frame = json!({
                "topic": topic,
                "event": event,
                "payload": payload,
                "ref": reference,
            });
            let _ = peer.tx.send(Message::Text(frame.to_string().into()));
        }
    }

    fn reply_ok(&self, peer: usize, topic: &str, reference: &Value) {
        self.push(peer, topic, "phx_reply", json!({"status": "ok", "response": {}}), reference.clone());
    }

    fn members(&self, topic: &str) -> Vec<(usize, JoinConfig)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(id, peer)| peer.topics.get(topic).map(|config| (*id, config.clone())))
            .collect()
    }

    fn presence_diff(&self, topic: &str, joins: Value, leaves: Value) {
        for (member, _) in self.members(topic) {
            self.push(
                member,
                topic,
                "presence_diff",
                json!({"joins": joins, "leaves": leaves}),
                Value::Null,
            );
        }
    }

    fn drop_presence(&self, peer: usize, topic: &str) {
        let removed: Vec<(String, Value)> = {
            let mut presence = self.presence.lock().unwrap();
            let Some(table) = presence.get_mut(topic) else {
                return;
            };
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, (owner, _))| *owner == peer)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| table.remove(&key).map(|(_, meta)| (key, meta)))
                .collect()
        };
        for (key, meta) in removed {
            self.presence_diff(topic, json!({}), json!({ key: {"metas": [meta]} }));
        }
    }

    fn handle(&self, peer: usize, frame: &Value) {
        let topic = frame["topic"].as_str().unwrap_or_default().to_string();
        let event = frame["event"].as_str().unwrap_or_default();
        let reference = frame["ref"].clone();

        match event {
            "heartbeat" => {
                self.heartbeats.fetch_add(1, Ordering::SeqCst);
                self.reply_ok(peer, &topic, &reference);
            }
            "phx_join" => {
                self.joins.fetch_add(1, Ordering::SeqCst);
                let config = &frame["payload"]["config"];
                let join = JoinConfig {
                    key: config["presence"]["key"].as_str().unwrap_or_default().to_string(),
                    echo: config["broadcast"]["self"].as_bool().unwrap_or(false),
                };
                if let Some(p) = self.peers.lock().unwrap().get_mut(&peer) {
                    p.topics.insert(topic.clone(), join);
                }
                self.reply_ok(peer, &topic, &reference);

                let mut state = Map::new();
                if let Some(table) = self.presence.lock().unwrap().get(&topic) {
                    for (key, (_, meta)) in table {
                        state.insert(key.clone(), json!({"metas": [meta]}));
                    }
                }
                self.push(peer, &topic, "presence_state", Value::Object(state), Value::Null);
            }
            "track" => {
                let Some((_, join)) = self.members(&topic).into_iter().find(|(id, _)| *id == peer) else {
                    return;
                };
                let mut meta = frame["payload"].clone();
                meta["phx_ref"] = json!(format!("p{peer}-{}", reference.as_str().unwrap_or_default()));
                self.presence
                    .lock()
                    .unwrap()
                    .entry(topic.clone())
                    .or_default()
                    .insert(join.key.clone(), (peer, meta.clone()));
                self.reply_ok(peer, &topic, &reference);
                self.presence_diff(&topic, json!({ join.key: {"metas": [meta]} }), json!({}));
            }
            "untrack" => {
                self.reply_ok(peer, &topic, &reference);
                self.drop_presence(peer, &topic);
            }
            "broadcast" => {
                for (member, config) in self.members(&topic) {
                    if member != peer || config.echo {
                        self.push(member, &topic, "broadcast", frame["payload"].clone(), Value::Null);
                    }
                }
            }
            "phx_leave" => {
                self.reply_ok(peer, &topic, &reference);
                if let Some(p) = self.peers.lock().unwrap().get_mut(&peer) {
                    p.topics.remove(&topic);
                }
                self.drop_presence(peer, &topic);
            }
            _ => {}
        }
    }

    /// Sends a close frame to every connected peer.
    fn kick_all(&self) {
        for peer in self.peers.lock().unwrap().values() {
            let _ = peer.tx.send(Message::Close(None));
        }
    }
}

async fn serve_peer(stream: TcpStream, relay: Arc<RelayState>) {
    let delay = relay.handshake_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        sleep(Duration::from_millis(delay)).await;
    }
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = relay.next_peer.fetch_add(1, Ordering::SeqCst);
    relay.peers.lock().unwrap().insert(id, Peer { tx, topics: HashMap::new() });

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_receiver.next().await {
        match message {
            Message::Text(text) => {
                if let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) {
                    relay.handle(id, &frame);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let topics: Vec<String> = relay
        .peers
        .lock()
        .unwrap()
        .remove(&id)
        .map(|peer| peer.topics.into_keys().collect())
        .unwrap_or_default();
    for topic in topics {
        relay.drop_presence(id, &topic);
    }
    relay.closes.fetch_add(1, Ordering::SeqCst);
    writer.abort();
}

async fn start_relay() -> (String, Arc<RelayState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Arc::new(RelayState::default());
    let accept_relay = relay.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if accept_relay.refuse.load(Ordering::SeqCst) {
                accept_relay.refused.fetch_add(1, Ordering::SeqCst);
                drop(stream);
                continue;
            }
            tokio::spawn(serve_peer(stream, accept_relay.clone()));
        }
    });
    (format!("http://{addr}"), relay)
}

fn options(key: &str) -> ChannelOptions {
    ChannelOptions {
        broadcast_self: false,
        presence_key: key.to_string(),
    }
}

async fn next_status(rx: &mut mpsc::UnboundedReceiver<ChannelStatus>) -> ChannelStatus {
    timeout(WAIT, rx.recv()).await.expect("status in time").expect("status sender alive")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_join_presence_and_broadcast() {
    let (url, relay) = start_relay().await;
    let alice = RealtimeClient::new(RealtimeConfig::new(&url, "anon")).unwrap();
    let bob = RealtimeClient::new(RealtimeConfig::new(&url, "anon")).unwrap();

    let alice_channel = alice.channel("duel-RELAY1", options("aaa"));
    let bob_channel = bob.channel("duel-RELAY1", options("bbb"));

    let (bob_events_tx, mut bob_events) = mpsc::unbounded_channel();
    bob_channel.on(ListenerKind::Broadcast, EventFilter::Any, move |event| {
        let _ = bob_events_tx.send(event.clone());
    });
    let (alice_events_tx, mut alice_events) = mpsc::unbounded_channel();
    alice_channel.on(ListenerKind::Broadcast, EventFilter::Any, move |event| {
        let _ = alice_events_tx.send(event.clone());
    });

    let (alice_status_tx, mut alice_status) = mpsc::unbounded_channel();
    alice_channel.subscribe(move |status| {
        let _ = alice_status_tx.send(status);
    });
    let (bob_status_tx, mut bob_status) = mpsc::unbounded_channel();
    bob_channel.subscribe(move |status| {
        let _ = bob_status_tx.send(status);
    });
    assert_eq!(next_status(&mut alice_status).await, ChannelStatus::Subscribed);
    assert_eq!(next_status(&mut bob_status).await, ChannelStatus::Subscribed);

    alice_channel.track(json!({"name": "Alice"})).unwrap();
    bob_channel.track(json!({"name": "Bob"})).unwrap();
    wait_until(|| alice_channel.presence_state().len() == 2).await;
    wait_until(|| bob_channel.presence_state().len() == 2).await;
    let keys: Vec<String> = alice_channel.presence_state().into_keys().collect();
    assert_eq!(keys, vec!["aaa", "bbb"]);

    alice_channel.broadcast("state", json!({"score": 4})).unwrap();
    let event = timeout(WAIT, bob_events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        ChannelEvent::Broadcast {
            event: "state".to_string(),
            payload: json!({"score": 4}),
        }
    );
    sleep(Duration::from_millis(100)).await;
    assert!(alice_events.try_recv().is_err(), "no self echo without broadcast_self");

    bob_channel.untrack().unwrap();
    wait_until(|| alice_channel.presence_state().len() == 1).await;

    alice_channel.unsubscribe();
    bob_channel.unsubscribe();
    assert_eq!(next_status(&mut alice_status).await, ChannelStatus::Closed);
    wait_until(|| relay.closes.load(Ordering::SeqCst) == 2).await;
    assert!(!alice.is_connected());
    assert!(!bob.is_connected());
}

#[tokio::test]
async fn test_heartbeats_reach_phoenix_topic() {
    let (url, relay) = start_relay().await;
    let mut config = RealtimeConfig::new(&url, "anon");
    config.heartbeat_interval = Duration::from_millis(100);
    let client = RealtimeClient::new(config).unwrap();

    let channel = client.channel("duel-BEAT01", options("hb"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });
    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);

    wait_until(|| relay.heartbeats.load(Ordering::SeqCst) >= 3).await;
    // Heartbeat replies on `phoenix` must not disturb the channel.
    assert!(channel.is_joined());
    assert!(status.try_recv().is_err());

    channel.unsubscribe();
}

#[tokio::test]
async fn test_reconnect_replays_join() {
    let (url, relay) = start_relay().await;
    let mut config = RealtimeConfig::new(&url, "anon");
    config.reconnect_delay = Duration::from_millis(100);
    let client = RealtimeClient::new(config).unwrap();

    let channel = client.channel("duel-AGAIN1", options("rc"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });
    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);
    assert_eq!(relay.joins.load(Ordering::SeqCst), 1);

    relay.kick_all();
    assert_eq!(next_status(&mut status).await, ChannelStatus::ChannelError);
    assert!(!channel.is_joined());

    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);
    assert!(channel.is_joined());
    assert_eq!(relay.joins.load(Ordering::SeqCst), 2);
    assert_eq!(relay.next_peer.load(Ordering::SeqCst), 2);

    channel.unsubscribe();
}

#[tokio::test]
async fn test_concurrent_connects_share_one_socket() {
    let (url, relay) = start_relay().await;
    let client = RealtimeClient::new(RealtimeConfig::new(&url, "anon")).unwrap();

    let channel = client.channel("duel-SHARE1", options("sh"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });

    let (first, second) = tokio::join!(client.ensure_connected(), client.ensure_connected());
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(client.is_connected());
    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.next_peer.load(Ordering::SeqCst), 1);

    channel.unsubscribe();
}

#[tokio::test]
async fn test_unsubscribe_during_handshake_leaves_no_socket() {
    let (url, relay) = start_relay().await;
    relay.handshake_delay_ms.store(300, Ordering::SeqCst);
    let client = RealtimeClient::new(RealtimeConfig::new(&url, "anon")).unwrap();

    let channel = client.channel("duel-LATE01", options("late"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });
    sleep(Duration::from_millis(50)).await;
    channel.unsubscribe();
    assert_eq!(next_status(&mut status).await, ChannelStatus::Closed);

    // The handshake completes after the last channel left.
    sleep(Duration::from_millis(800)).await;
    assert_eq!(client.channel_count(), 0);
    assert!(!client.is_connected(), "socket left open without channels");
    wait_until(|| relay.closes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(relay.joins.load(Ordering::SeqCst), 0);
    assert!(status.try_recv().is_err());
}

#[tokio::test]
async fn test_reconnect_attempts_do_not_stack() {
    let (url, relay) = start_relay().await;
    let mut config = RealtimeConfig::new(&url, "anon");
    config.reconnect_delay = Duration::from_millis(200);
    let client = RealtimeClient::new(config).unwrap();

    let channel = client.channel("duel-RETRY1", options("rt"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });
    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);

    // Close repeatedly while every reconnect attempt fails.
    relay.refuse.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        relay.kick_all();
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(next_status(&mut status).await, ChannelStatus::ChannelError);

    // One attempt per 200 ms window; stacked timers would multiply them.
    sleep(Duration::from_millis(1_000)).await;
    let attempts = relay.refused.load(Ordering::SeqCst);
    assert!((3..=6).contains(&attempts), "{attempts} reconnect attempts in 1s");

    relay.refuse.store(false, Ordering::SeqCst);
    assert_eq!(next_status(&mut status).await, ChannelStatus::Subscribed);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(relay.next_peer.load(Ordering::SeqCst), 2, "exactly one socket after recovery");
    assert_eq!(relay.joins.load(Ordering::SeqCst), 2);
    assert!(status.try_recv().is_err());

    channel.unsubscribe();
}

#[tokio::test]
async fn test_connect_times_out_on_silent_server() {
    // Accepts TCP but never completes the websocket handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut config = RealtimeConfig::new(format!("http://{addr}"), "anon");
    config.connect_timeout = Duration::from_millis(200);
    let client = RealtimeClient::new(config).unwrap();

    let err = client.ensure_connected().await.unwrap_err();
    assert_eq!(err, RealtimeError::ConnectTimeout(200));

    let channel = client.channel("duel-QUIET1", options("q"));
    let (status_tx, mut status) = mpsc::unbounded_channel();
    channel.subscribe(move |s| {
        let _ = status_tx.send(s);
    });
    assert_eq!(next_status(&mut status).await, ChannelStatus::ChannelError);
    channel.unsubscribe();
}
