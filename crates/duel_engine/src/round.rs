//! Per-client view of one round.
//!
//! Every participant keeps a [`RoundState`]: the authoritative food cell and
//! version, the score table, its own claim bookkeeping and whether it has
//! already reported a result. The food/version pair only changes by
//! applying a whole `food-update`, and only forwards.

use crate::messages::{EndCause, FoodUpdate, Outcome, Start};
use crate::types::{Cell, ParticipantId, Scores};

/// What a superseding food update meant for optimistic local growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthOutcome {
    /// No claim was pending
    Unchanged,
    /// The update awarded our pending claim
    Confirmed,
    /// The update went elsewhere; the extra segment must be removed once
    RolledBack,
}

/// Effect of a food update that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub growth: GrowthOutcome,
    pub winner: Option<ParticipantId>,
}

/// How the round ended for this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundEnd {
    pub outcome: Outcome,
    pub cause: EndCause,
}

/// State of the current round on one client.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub seed: u32,
    pub start_at: u64,
    pub host: ParticipantId,
    pub opponent: ParticipantId,
    food: Cell,
    food_version: u64,
    scores: Scores,
    /// Highest food version this client has claimed
    claimed_version: Option<u64>,
    /// Version whose optimistic growth awaits confirmation
    pending_growth: Option<u64>,
    result_sent: bool,
    end: Option<RoundEnd>,
}

impl RoundState {
    pub fn new(start: &Start, host: ParticipantId, opponent: ParticipantId) -> Self {
        Self {
            seed: start.seed,
            start_at: start.start_at,
            host,
            opponent,
            food: start.food,
            food_version: start.food_version,
            scores: start.scores.clone(),
            claimed_version: None,
            pending_growth: None,
            result_sent: false,
            end: None,
        }
    }

    pub fn food(&self) -> Cell {
        self.food
    }

    pub fn food_version(&self) -> u64 {
        self.food_version
    }

    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    pub fn score_of(&self, id: &ParticipantId) -> u32 {
        self.scores.get(id).copied().unwrap_or_default()
    }

    pub fn has_started(&self, now: u64) -> bool {
        now >= self.start_at
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    pub fn end(&self) -> Option<RoundEnd> {
        self.end
    }

    /// Claims the current food if `head` is on it and this version has not
    /// been claimed yet. Records the optimistic growth.
    ///
    /// # Returns
    ///
    /// The claimed version, or `None` if nothing should be sent.
    pub fn try_claim(&mut self, head: Cell) -> Option<u64> {
        if self.is_finished() || head != self.food {
            return None;
        }
        if self.claimed_version.is_some_and(|claimed| claimed >= self.food_version) {
            return None;
        }
        self.claimed_version = Some(self.food_version);
        self.pending_growth = Some(self.food_version);
        Some(self.food_version)
    }

    /// Applies a `food-update` from the host.
    ///
    /// Updates whose version is not newer than the last applied one are
    /// ignored. Otherwise food and version are adopted, scores merged, and
    /// any pending growth is confirmed (the update to `v + 1` names us as
    /// eater) or rolled back.
    ///
    /// # Returns
    ///
    /// `None` for a stale update.
    pub fn apply_food_update(&mut self, update: &FoodUpdate, me: &ParticipantId) -> Option<AppliedUpdate> {
        if update.food_version <= self.food_version {
            return None;
        }

        self.food = update.food;
        self.food_version = update.food_version;
        for (id, score) in &update.scores {
            self.scores.insert(id.clone(), *score);
        }

        let growth = match self.pending_growth.take() {
            None => GrowthOutcome::Unchanged,
            Some(claimed) if update.food_version == claimed + 1 && &update.eater_id == me => {
                GrowthOutcome::Confirmed
            }
            Some(_) => GrowthOutcome::RolledBack,
        };

        Some(AppliedUpdate {
            growth,
            winner: update.winner_id.clone(),
        })
    }

    /// Marks the round finished. Returns `false` if it already was.
    pub fn finish(&mut self, outcome: Outcome, cause: EndCause) -> bool {
        if self.end.is_some() {
            return false;
        }
        self.end = Some(RoundEnd { outcome, cause });
        self.pending_growth = None;
        true
    }

    /// Takes the single result this client may send for the round.
    pub fn take_result_slot(&mut self) -> bool {
        !std::mem::replace(&mut self.result_sent, true)
    }
}
