//! Core value types shared by every part of the duel engine.
//!
//! Participant identity, grid cells and headings, room codes and the
//! score table all live here so the wire messages and the session logic
//! agree on one representation.

use crate::error::DuelError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Stable random identity of one participant.
///
/// Participant ids are opaque tokens, unrelated to any account. Ordering is
/// plain string ordering, which is what host election and spawn slots use.
///
/// # Examples
///
/// ```rust
/// use duel_engine::ParticipantId;
///
/// let id = ParticipantId::new();
/// assert_eq!(id.as_str().len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a new random id (UUID v4 in simple form).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Score per participant, as carried by `start`, `state` and `food-update`.
pub type Scores = BTreeMap<ParticipantId, u32>;

/// A grid cell. Coordinates are signed so out-of-range input can be
/// represented before it is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Clamps both coordinates into `[0, grid_size - 1]`.
    pub fn clamped(self, grid_size: u32) -> Self {
        let max = i32::try_from(grid_size.saturating_sub(1)).unwrap_or(i32::MAX);
        Self {
            x: self.x.clamp(0, max),
            y: self.y.clamp(0, max),
        }
    }
}

/// Heading of a snake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Unit step `(dx, dy)` with y growing downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(DuelError::Decode {
                event: "dir".to_string(),
                reason: format!("unknown direction '{other}'"),
            }),
        }
    }
}

/// Letters used for room codes; `I` and `O` are left out so codes read
/// unambiguously.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Short code naming a room; its channel topic is `duel-<CODE>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generates a fresh random code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parses a user-entered code: surrounding whitespace is trimmed and
    /// letters are upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidRoomCode`] if the code has the wrong
    /// length or uses characters outside the alphabet.
    pub fn parse(input: &str) -> Result<Self, DuelError> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == ROOM_CODE_LEN
            && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));
        if !valid {
            return Err(DuelError::InvalidRoomCode(input.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel name for this room (without the relay's topic prefix).
    pub fn topic(&self) -> String {
        format!("duel-{}", self.0)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display name used when none is given.
pub const DEFAULT_PLAYER_NAME: &str = "Player 1";

/// Longest display name kept, in characters.
pub const MAX_PLAYER_NAME_LEN: usize = 24;

/// Trims a display name, falls back to [`DEFAULT_PLAYER_NAME`] when empty
/// and truncates overly long names.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    trimmed.chars().take(MAX_PLAYER_NAME_LEN).collect()
}

/// Milliseconds since the Unix epoch.
///
/// Claim timestamps are compared across clients, so wall-clock time is used
/// rather than a monotonic clock.
pub fn current_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
