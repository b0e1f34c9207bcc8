//! Wire envelope for the relay's channel protocol (vsn 1.0.0).
//!
//! Every frame on the socket is a JSON object of the form
//! `{ "topic", "event", "payload", "ref", "join_ref" }`. This module owns the
//! envelope type, the reserved event names and the payload builders the
//! channel needs. Presence payload decoding lives in [`crate::presence`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reserved topic used for socket-level heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_PRESENCE_STATE: &str = "presence_state";
pub const EVENT_PRESENCE_DIFF: &str = "presence_diff";
pub const EVENT_BROADCAST: &str = "broadcast";
pub const EVENT_TRACK: &str = "track";
pub const EVENT_UNTRACK: &str = "untrack";

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// Correlation reference, a decimal string from the client's counter
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    /// Builds an outbound frame. The reference is stamped by the transport.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
            join_ref: None,
        }
    }

    /// Parses an inbound text frame. Returns `None` for anything that is not
    /// a well-formed envelope; callers drop such frames.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Reply status (`"ok"`, `"error"`, ...) of a `phx_reply` frame.
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Splits a `broadcast` frame into its user event name and inner payload.
    ///
    /// The relay wraps user broadcasts as
    /// `{"type": "broadcast", "event": <name>, "payload": <object>}`. A
    /// missing event name is empty; a missing inner payload yields the
    /// whole frame payload.
    pub fn broadcast_parts(&self) -> (&str, &Value) {
        let event = self.payload.get("event").and_then(Value::as_str).unwrap_or_default();
        let payload = self.payload.get("payload").unwrap_or(&self.payload);
        (event, payload)
    }
}

/// Payload of a `phx_join` request.
pub fn join_payload(broadcast_self: bool, presence_key: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "ack": false, "self": broadcast_self },
            "presence": { "key": presence_key },
            "postgres_changes": [],
            "private": false,
        }
    })
}

/// Payload of an outbound user broadcast.
pub fn broadcast_payload(event: &str, payload: Value) -> Value {
    json!({
        "type": "broadcast",
        "event": event,
        "payload": payload,
    })
}

/// Payload of a `track` request: the metadata itself, as an object.
pub fn track_payload(meta: Value) -> Value {
    match meta {
        Value::Object(_) => meta,
        Value::Null => json!({}),
        other => json!({ "value": other }),
    }
}
