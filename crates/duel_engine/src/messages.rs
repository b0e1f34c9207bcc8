//! Duel wire messages.
//!
//! Each message travels as a channel broadcast whose event name is the
//! message kind (`hello`, `start`, `state`, `food-claim`, `food-update`,
//! `result`) and whose payload is a camelCase JSON object. Every payload
//! also carries the sender's id as `from` and its send time as `sentAt`.
//!
//! Decoding is strict about shape and lenient about range: unknown event
//! names, missing fields and unknown directions are rejected, while cell
//! coordinates are clamped into the grid and snakes are capped at the grid
//! area.

use crate::config::max_snake_len;
use crate::error::DuelError;
use crate::types::{Cell, Direction, ParticipantId, Scores};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EVENT_HELLO: &str = "hello";
pub const EVENT_START: &str = "start";
pub const EVENT_STATE: &str = "state";
pub const EVENT_FOOD_CLAIM: &str = "food-claim";
pub const EVENT_FOOD_UPDATE: &str = "food-update";
pub const EVENT_RESULT: &str = "result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub name: String,
}

/// Round start, sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Start {
    pub seed: u32,
    /// Wall-clock time (ms) at which both sides take their first step
    pub start_at: u64,
    pub food: Cell,
    pub food_version: u64,
    pub scores: Scores,
}

/// Periodic snapshot of a sender's local simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub score: u32,
    pub alive: bool,
    pub dir: Direction,
    /// Snake cells, head first
    pub snake: Vec<Cell>,
    pub food_version: u64,
    #[serde(default)]
    pub food: Option<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
}

/// Assertion that the sender's head reached the food of `food_version`.
/// The claim time is the envelope's `sentAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodClaim {
    pub food_version: u64,
    pub head: Cell,
}

/// Authoritative food state after a claim was resolved, sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodUpdate {
    pub food: Cell,
    pub food_version: u64,
    pub scores: Scores,
    pub eater_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<ParticipantId>,
}

/// Round outcome from the sender's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Lose,
    Draw,
}

impl Outcome {
    /// The same outcome seen from the other side.
    pub fn mirrored(self) -> Self {
        match self {
            Outcome::Win => Outcome::Lose,
            Outcome::Lose => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }
}

/// Why a round ended for the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndCause {
    /// The sender's head hit the opponent's body
    Collision,
    /// The sender's own simulation died (wall or self)
    Crashed,
    /// Someone reached the target score
    Target,
    /// The sender learned of the end from the opponent's result
    Opponent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub result: Outcome,
    pub score: u32,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<EndCause>,
}

/// One duel message body.
#[derive(Debug, Clone, PartialEq)]
pub enum DuelMessage {
    Hello(Hello),
    Start(Start),
    State(StateSnapshot),
    FoodClaim(FoodClaim),
    FoodUpdate(FoodUpdate),
    Result(RoundResult),
}

impl DuelMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            DuelMessage::Hello(_) => EVENT_HELLO,
            DuelMessage::Start(_) => EVENT_START,
            DuelMessage::State(_) => EVENT_STATE,
            DuelMessage::FoodClaim(_) => EVENT_FOOD_CLAIM,
            DuelMessage::FoodUpdate(_) => EVENT_FOOD_UPDATE,
            DuelMessage::Result(_) => EVENT_RESULT,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    from: ParticipantId,
    sent_at: u64,
}

/// A message with its sender and send time.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: ParticipantId,
    pub sent_at: u64,
    pub message: DuelMessage,
}

impl Envelope {
    pub fn new(from: ParticipantId, sent_at: u64, message: DuelMessage) -> Self {
        Self { from, sent_at, message }
    }

    /// Encodes the envelope as `(event name, payload)` for a broadcast.
    pub fn encode(&self) -> Result<(&'static str, Value), DuelError> {
        let body = match &self.message {
            DuelMessage::Hello(body) => serde_json::to_value(body),
            DuelMessage::Start(body) => serde_json::to_value(body),
            DuelMessage::State(body) => serde_json::to_value(body),
            DuelMessage::FoodClaim(body) => serde_json::to_value(body),
            DuelMessage::FoodUpdate(body) => serde_json::to_value(body),
            DuelMessage::Result(body) => serde_json::to_value(body),
        };
        let event = self.message.event_name();
        let mut payload = match body {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => return Err(decode_error(event, e)),
        };
        payload.insert("from".to_string(), Value::String(self.from.to_string()));
        payload.insert("sentAt".to_string(), Value::from(self.sent_at));
        Ok((event, Value::Object(payload)))
    }

    /// Decodes and validates an inbound broadcast.
    ///
    /// # Errors
    ///
    /// [`DuelError::Decode`] for unknown events, missing or mistyped
    /// fields, unknown directions and empty snakes.
    pub fn decode(event: &str, payload: &Value, grid_size: u32) -> Result<Self, DuelError> {
        let header: Header = parse(event, payload)?;
        let message = match event {
            EVENT_HELLO => DuelMessage::Hello(parse(event, payload)?),
            EVENT_START => {
                let mut start: Start = parse(event, payload)?;
                start.food = start.food.clamped(grid_size);
                DuelMessage::Start(start)
            }
            EVENT_STATE => {
                let mut state: StateSnapshot = parse(event, payload)?;
                sanitize_snapshot(&mut state, grid_size)
                    .map_err(|reason| DuelError::Decode { event: event.to_string(), reason })?;
                DuelMessage::State(state)
            }
            EVENT_FOOD_CLAIM => {
                let mut claim: FoodClaim = parse(event, payload)?;
                claim.head = claim.head.clamped(grid_size);
                DuelMessage::FoodClaim(claim)
            }
            EVENT_FOOD_UPDATE => {
                let mut update: FoodUpdate = parse(event, payload)?;
                update.food = update.food.clamped(grid_size);
                DuelMessage::FoodUpdate(update)
            }
            EVENT_RESULT => DuelMessage::Result(parse(event, payload)?),
            other => {
                return Err(DuelError::Decode {
                    event: other.to_string(),
                    reason: "unknown event".to_string(),
                })
            }
        };
        Ok(Self {
            from: header.from,
            sent_at: header.sent_at,
            message,
        })
    }
}

/// Caps the snake at the grid area and clamps every cell.
fn sanitize_snapshot(state: &mut StateSnapshot, grid_size: u32) -> Result<(), String> {
    if state.snake.is_empty() {
        return Err("snapshot has an empty snake".to_string());
    }
    state.snake.truncate(max_snake_len(grid_size));
    for cell in &mut state.snake {
        *cell = cell.clamped(grid_size);
    }
    state.food = state.food.map(|food| food.clamped(grid_size));
    Ok(())
}

fn parse<T: DeserializeOwned>(event: &str, payload: &Value) -> Result<T, DuelError> {
    T::deserialize(payload).map_err(|e| decode_error(event, e))
}

fn decode_error(event: &str, err: serde_json::Error) -> DuelError {
    DuelError::Decode {
        event: event.to_string(),
        reason: err.to_string(),
    }
}
