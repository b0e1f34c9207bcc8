//! Session phases and the room view derived from presence.
//!
//! A session moves forward through
//! `idle -> connecting -> waiting-for-opponent -> ready -> round-active ->
//! round-finished`. The only ways back are a rematch
//! (`round-finished -> waiting-for-opponent`) and leaving (`-> idle`), plus
//! presence-driven fallbacks: losing the opponent drops `ready` and an
//! abandoned round back to `waiting-for-opponent`.

use crate::types::ParticipantId;
use serde::Serialize;
use std::fmt;

/// Phase of a duel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    WaitingForOpponent,
    Ready,
    RoundActive,
    RoundFinished,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::WaitingForOpponent => "waiting-for-opponent",
            SessionPhase::Ready => "ready",
            SessionPhase::RoundActive => "round-active",
            SessionPhase::RoundFinished => "round-finished",
        }
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, WaitingForOpponent)
                | (WaitingForOpponent, Ready)
                | (Ready, WaitingForOpponent)
                | (Ready, RoundActive)
                | (RoundActive, RoundFinished)
                | (RoundActive, WaitingForOpponent)
                | (RoundFinished, WaitingForOpponent)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room membership as seen through presence.
///
/// Recomputed from scratch on every presence change, so the host is always
/// the smallest id currently present and never sticks to someone who left.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomView {
    /// Distinct present ids, sorted
    pub participants: Vec<ParticipantId>,
    pub host: Option<ParticipantId>,
}

impl RoomView {
    /// Builds the view from presence keys.
    pub fn from_presence<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ParticipantId>,
    {
        let mut participants: Vec<ParticipantId> = keys.into_iter().map(Into::into).collect();
        participants.sort();
        participants.dedup();
        let host = participants.first().cloned();
        Self { participants, host }
    }

    /// Exactly two participants are present.
    pub fn is_ready(&self) -> bool {
        self.participants.len() == 2
    }

    /// More than two participants are present; starting is blocked.
    pub fn is_full(&self) -> bool {
        self.participants.len() > 2
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.binary_search(id).is_ok()
    }

    pub fn is_host(&self, id: &ParticipantId) -> bool {
        self.host.as_ref() == Some(id)
    }

    /// The other participant in a ready room.
    pub fn opponent_of(&self, me: &ParticipantId) -> Option<&ParticipantId> {
        if !self.is_ready() {
            return None;
        }
        self.participants.iter().find(|id| *id != me)
    }

    /// Human-readable room status.
    pub fn status_text(&self, me: &ParticipantId) -> String {
        match self.participants.len() {
            0 | 1 => "Waiting for opponent".to_string(),
            2 if self.is_host(me) => "Opponent joined, you are the host".to_string(),
            2 => "Opponent joined, waiting for host to start".to_string(),
            n => format!("Room full ({n} players)"),
        }
    }
}
