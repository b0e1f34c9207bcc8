//! Snapshot exchange between the two clients.
//!
//! Outbound, a [`SnapshotCadence`] decides when the next periodic `state`
//! is due. Inbound, a [`SnapshotStore`] keeps the latest snapshot per
//! sender with its receipt time and treats anything older than the
//! staleness threshold as absent. There is no extrapolation.

use crate::messages::StateSnapshot;
use crate::types::{Cell, ParticipantId};
use std::collections::HashMap;

/// Last known state of a remote participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub sent_at: u64,
    pub received_at: u64,
    pub state: StateSnapshot,
}

impl RemoteSnapshot {
    pub fn cells(&self) -> &[Cell] {
        &self.state.snake
    }
}

/// Latest snapshot per sender.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    staleness_ms: u64,
    latest: HashMap<ParticipantId, RemoteSnapshot>,
}

impl SnapshotStore {
    pub fn new(staleness_ms: u64) -> Self {
        Self {
            staleness_ms,
            latest: HashMap::new(),
        }
    }

    /// Stores a snapshot unless a newer one from the same sender is held.
    pub fn store(&mut self, from: &ParticipantId, sent_at: u64, state: StateSnapshot, now: u64) -> bool {
        if self.latest.get(from).is_some_and(|held| held.sent_at > sent_at) {
            return false;
        }
        self.latest.insert(
            from.clone(),
            RemoteSnapshot {
                sent_at,
                received_at: now,
                state,
            },
        );
        true
    }

    /// Snapshot of `from` if it is no older than the staleness threshold.
    pub fn fresh(&self, from: &ParticipantId, now: u64) -> Option<&RemoteSnapshot> {
        self.latest
            .get(from)
            .filter(|snapshot| now.saturating_sub(snapshot.received_at) <= self.staleness_ms)
    }

    /// Snapshot of `from` regardless of age.
    pub fn latest(&self, from: &ParticipantId) -> Option<&RemoteSnapshot> {
        self.latest.get(from)
    }

    /// Time at which the snapshot of `from` turns stale.
    pub fn expires_at(&self, from: &ParticipantId) -> Option<u64> {
        self.latest
            .get(from)
            .map(|snapshot| snapshot.received_at + self.staleness_ms + 1)
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }
}

/// Whether `head` lies on the body of a fresh opponent snapshot.
pub fn collides(head: Cell, opponent: Option<&RemoteSnapshot>) -> bool {
    opponent.is_some_and(|snapshot| snapshot.cells().contains(&head))
}

/// Fixed minimum interval between periodic outbound snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotCadence {
    interval_ms: u64,
    last_sent: Option<u64>,
}

impl SnapshotCadence {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_sent: None,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.last_sent
            .map_or(true, |last| now.saturating_sub(last) >= self.interval_ms)
    }

    pub fn next_due(&self) -> Option<u64> {
        self.last_sent.map(|last| last + self.interval_ms)
    }

    pub fn mark_sent(&mut self, now: u64) {
        self.last_sent = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
