//! # Duel Realtime
//!
//! A small client for a Phoenix-style realtime relay (protocol vsn 1.0.0),
//! written directly against a websocket. It provides exactly what a
//! two-player duel needs from the relay:
//!
//! * [`RealtimeClient`] - one socket with connect timeout, heartbeat,
//!   fixed-delay reconnect and topic multiplexing
//! * [`Channel`] - join/leave handshake, presence tracking and broadcast
//!   listeners for one topic
//! * [`PresenceTable`] - presence state rebuilt from full syncs and diffs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use duel_realtime::{ChannelOptions, EventFilter, ListenerKind, RealtimeClient, RealtimeConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), duel_realtime::RealtimeError> {
//! let client = RealtimeClient::new(RealtimeConfig::new("https://relay.example.co", "anon-key"))?;
//! let channel = client.channel("duel-ABCDEF", ChannelOptions {
//!     broadcast_self: false,
//!     presence_key: "my-id".to_string(),
//! });
//!
//! channel.on(ListenerKind::Broadcast, EventFilter::Any, |event| {
//!     println!("{event:?}");
//! });
//! channel.subscribe(|status| println!("status: {status}"));
//!
//! // later, once SUBSCRIBED
//! channel.broadcast("hello", json!({ "name": "Player 1" }))?;
//! channel.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod presence;
pub mod transport;

pub use channel::{
    Channel, ChannelEvent, ChannelOptions, ChannelStatus, EventFilter, ListenerKind, PRESENCE_SYNC,
};
pub use config::{wire_topic, RealtimeConfig};
pub use error::{RealtimeError, Result};
pub use frame::Frame;
pub use presence::{PresenceMeta, PresenceSnapshot, PresenceTable};
pub use transport::RealtimeClient;
