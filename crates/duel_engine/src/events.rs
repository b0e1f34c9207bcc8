//! Notifications from a duel session to the presentation layer.

use crate::messages::{EndCause, Outcome};
use crate::session::{RoomView, SessionPhase};
use crate::types::{Cell, ParticipantId, Scores};

/// Event emitted by a [`DuelSession`](crate::DuelSession).
#[derive(Debug, Clone, PartialEq)]
pub enum DuelEvent {
    /// Room status line for display
    Status(String),
    Phase(SessionPhase),
    Room(RoomView),
    OpponentHello { id: ParticipantId, name: String },
    RoundStarting { seed: u32, start_at: u64 },
    FoodChanged { food: Cell, version: u64 },
    Scores(Scores),
    /// Opponent score from its latest fresh snapshot; `None` once stale
    OpponentScore(Option<u32>),
    RoundResult { outcome: Outcome, cause: EndCause, text: String },
    /// The opponent left mid-round; no winner
    RoundAbandoned,
}

/// Result text shown to the player.
pub fn result_text(outcome: Outcome, cause: EndCause) -> String {
    let headline = match outcome {
        Outcome::Win => "You win!",
        Outcome::Lose => "You lose.",
        Outcome::Draw => "Draw.",
    };
    let detail = match (outcome, cause) {
        (_, EndCause::Target) => "Target score reached",
        (Outcome::Lose, EndCause::Collision) => "You ran into your opponent",
        (Outcome::Lose, EndCause::Crashed) => "You crashed",
        (Outcome::Win, EndCause::Opponent) => "Your opponent is out",
        (_, EndCause::Opponent) => "Your opponent finished the round",
        (_, EndCause::Collision) | (_, EndCause::Crashed) => "Round over",
    };
    format!("{headline} {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_text() {
        assert_eq!(result_text(Outcome::Lose, EndCause::Crashed), "You lose. You crashed");
        assert_eq!(result_text(Outcome::Win, EndCause::Target), "You win! Target score reached");
    }
}
