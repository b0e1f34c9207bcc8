//! Host-side round authority.
//!
//! The host owns the only [`RoundArbiter`] in a room. It collects food
//! claims for the current version, waits out a short window so near-
//! simultaneous claims can compete, and then picks the winner by earliest
//! send time (ties by smaller id). The resolution produces the next
//! `food-update`.

use crate::config::DuelConfig;
use crate::layout::place_food;
use crate::messages::{FoodUpdate, Start};
use crate::rng::Lcg;
use crate::types::{Cell, ParticipantId, Scores};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Claim collection and resolution for one round.
#[derive(Debug, Clone)]
pub struct RoundArbiter {
    rng: Lcg,
    grid_size: u32,
    target_score: u32,
    claim_window_ms: u64,
    food: Cell,
    version: u64,
    scores: Scores,
    /// `(version, claimant) -> sentAt`
    claims: BTreeMap<(u64, ParticipantId), u64>,
    resolve_at: Option<u64>,
    finished: bool,
}

impl RoundArbiter {
    /// Creates the arbiter from the `start` the host just sent.
    ///
    /// `rng` must be the generator state left after placing the first food,
    /// so later food keeps following the round seed.
    pub fn new(rng: Lcg, start: &Start, config: &DuelConfig) -> Self {
        Self {
            rng,
            grid_size: config.grid_size,
            target_score: config.target_score,
            claim_window_ms: config.claim_window_ms,
            food: start.food,
            version: start.food_version,
            scores: start.scores.clone(),
            claims: BTreeMap::new(),
            resolve_at: None,
            finished: false,
        }
    }

    /// Records a claim.
    ///
    /// Claims for any version other than the current one, claims whose head
    /// is not on the food, and repeated claims by the same participant are
    /// ignored. The first accepted claim opens the resolution window.
    ///
    /// # Returns
    ///
    /// `true` if the claim was recorded.
    pub fn collect(&mut self, from: &ParticipantId, version: u64, head: Cell, sent_at: u64, now: u64) -> bool {
        if self.finished || version != self.version || head != self.food {
            trace!("🗑️ Ignoring claim v{} from {}", version, from);
            return false;
        }
        let key = (version, from.clone());
        if self.claims.contains_key(&key) {
            return false;
        }
        self.claims.insert(key, sent_at);
        if self.resolve_at.is_none() {
            self.resolve_at = Some(now + self.claim_window_ms);
        }
        debug!("🍎 Claim v{} from {} at {}", version, from, sent_at);
        true
    }

    /// When the open claim window closes, if one is open.
    pub fn next_deadline(&self) -> Option<u64> {
        self.resolve_at
    }

    /// Resolves the current version once its window has closed.
    ///
    /// # Arguments
    ///
    /// * `now` - Current time in ms
    /// * `bodies` - Known snake bodies the next food must avoid
    ///
    /// # Returns
    ///
    /// The `food-update` to broadcast, or `None` if no window has closed.
    pub fn resolve_due(&mut self, now: u64, bodies: &[&[Cell]]) -> Option<FoodUpdate> {
        let deadline = self.resolve_at?;
        if now < deadline {
            return None;
        }
        self.resolve_at = None;

        let version = self.version;
        let winner = self
            .claims
            .iter()
            .filter(|((claimed, _), _)| *claimed == version)
            .min_by(|((_, a_id), a_at), ((_, b_id), b_at)| a_at.cmp(b_at).then_with(|| a_id.cmp(b_id)))
            .map(|((_, id), _)| id.clone());
        self.claims.retain(|(claimed, _), _| *claimed > version);
        let winner = winner?;

        let score = self.scores.entry(winner.clone()).or_insert(0);
        *score += 1;
        let reached_target = *score >= self.target_score;

        if let Some(food) = place_food(&mut self.rng, self.grid_size, bodies) {
            self.food = food;
        }
        self.version += 1;

        let winner_id = if reached_target {
            self.finished = true;
            Some(winner.clone())
        } else {
            None
        };
        debug!("🏁 Food v{} goes to {}", version, winner);

        Some(FoodUpdate {
            food: self.food,
            food_version: self.version,
            scores: self.scores.clone(),
            eater_id: winner,
            winner_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn arbiter(target: u32) -> RoundArbiter {
        let mut scores = Scores::new();
        scores.insert(id("a"), 0);
        scores.insert(id("b"), 0);
        let start = Start {
            seed: 1,
            start_at: 0,
            food: Cell::new(3, 3),
            food_version: 3,
            scores,
        };
        let config = DuelConfig {
            target_score: target,
            ..Default::default()
        };
        RoundArbiter::new(Lcg::new(1), &start, &config)
    }

    const FOOD: Cell = Cell::new(3, 3);

    #[test]
    fn test_earlier_claim_wins_regardless_of_arrival() {
        let mut arbiter = arbiter(10);
        assert!(arbiter.collect(&id("a"), 3, FOOD, 1_000, 5_000));
        assert!(arbiter.collect(&id("b"), 3, FOOD, 900, 5_010));
        assert_eq!(arbiter.next_deadline(), Some(5_060));

        assert!(arbiter.resolve_due(5_059, &[]).is_none());
        let update = arbiter.resolve_due(5_060, &[]).unwrap();
        assert_eq!(update.eater_id, id("b"));
        assert_eq!(update.food_version, 4);
        assert_eq!(update.scores[&id("b")], 1);
        assert_eq!(update.scores[&id("a")], 0);
        assert_eq!(update.winner_id, None);
    }

    #[test]
    fn test_tie_goes_to_smaller_id() {
        let mut arbiter = arbiter(10);
        arbiter.collect(&id("b"), 3, FOOD, 700, 0);
        arbiter.collect(&id("a"), 3, FOOD, 700, 1);
        assert_eq!(arbiter.resolve_due(100, &[]).unwrap().eater_id, id("a"));
    }

    #[test]
    fn test_duplicate_and_stale_claims_ignored() {
        let mut arbiter = arbiter(10);
        assert!(arbiter.collect(&id("a"), 3, FOOD, 10, 0));
        assert!(!arbiter.collect(&id("a"), 3, FOOD, 5, 1));
        assert!(!arbiter.collect(&id("b"), 2, FOOD, 1, 1));
        assert!(!arbiter.collect(&id("b"), 3, Cell::new(0, 0), 1, 1));

        let update = arbiter.resolve_due(60, &[]).unwrap();
        assert_eq!(update.scores[&id("a")], 1);
        // Old-version claims after resolution do nothing.
        assert!(!arbiter.collect(&id("b"), 3, FOOD, 2, 70));
        assert!(arbiter.next_deadline().is_none());
    }

    #[test]
    fn test_next_food_avoids_bodies() {
        let mut arbiter = arbiter(10);
        let body: Vec<Cell> = (0..20).map(|x| Cell::new(x, 0)).collect();
        arbiter.collect(&id("a"), 3, FOOD, 1, 0);
        let update = arbiter.resolve_due(60, &[&body]).unwrap();
        assert!(!body.contains(&update.food));
        assert_eq!(arbiter.food, update.food);
    }

    #[test]
    fn test_target_reached_sets_winner() {
        let mut arbiter = arbiter(1);
        arbiter.collect(&id("b"), 3, FOOD, 1, 0);
        let update = arbiter.resolve_due(60, &[]).unwrap();
        assert_eq!(update.winner_id, Some(id("b")));
        let food = arbiter.food;
        assert!(!arbiter.collect(&id("a"), 4, food, 2, 70));
    }
}
