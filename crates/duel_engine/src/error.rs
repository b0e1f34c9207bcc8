//! Error types for the duel engine.
//!
//! Most protocol problems never surface as errors: malformed or stale
//! messages are dropped and out-of-range values are clamped. What remains
//! are misuse of the session (starting when not host, wrong phase), bad
//! configuration or room codes, and failures from the realtime layer.

use crate::session::SessionPhase;
use duel_realtime::RealtimeError;

/// Enumeration of duel engine errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DuelError {
    #[error("Invalid room code: '{0}'")]
    InvalidRoomCode(String),

    #[error("Invalid duel configuration: {0}")]
    InvalidConfig(String),

    /// An inbound message could not be decoded or failed validation
    #[error("Could not decode '{event}' message: {reason}")]
    Decode { event: String, reason: String },

    /// Only the current host may start a round
    #[error("Only the host can start a round")]
    NotHost,

    /// The room does not hold exactly two participants
    #[error("Room is not ready: {0}")]
    NotReady(String),

    /// The requested operation is not valid in the current phase
    #[error("Cannot {action} while {phase}")]
    InvalidPhase { action: String, phase: SessionPhase },

    /// The task driving the session has stopped
    #[error("Duel session has ended")]
    SessionClosed,

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}
