//! The duel session aggregate.
//!
//! [`DuelSession`] holds everything one client knows about its room and
//! round: phase, presence-derived room view, round state, the local
//! simulation, the host's arbiter and the opponent's last snapshot. It does
//! no I/O. Every input (channel status, presence change, inbound broadcast,
//! simulation tick, timer poll, UI command) is a method taking the current
//! time, and every output is an [`Action`] in the returned [`Outbox`] for the
//! caller to perform.
//!
//! Time is wall-clock milliseconds, because claim send times are compared
//! across clients.

use crate::arbiter::RoundArbiter;
use crate::config::DuelConfig;
use crate::error::DuelError;
use crate::events::{result_text, DuelEvent};
use crate::layout::{round_layout, slot_for};
use crate::messages::{
    DuelMessage, EndCause, Envelope, FoodClaim, FoodUpdate, Hello, Outcome, RoundResult, Start,
    StateSnapshot,
};
use crate::round::{GrowthOutcome, RoundState};
use crate::session::{RoomView, SessionPhase};
use crate::simulation::{Simulation, SimulationFactory};
use crate::sync::{collides, SnapshotCadence, SnapshotStore};
use crate::types::{normalize_name, Cell, Direction, ParticipantId, RoomCode, Scores};
use duel_realtime::ChannelStatus;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

/// Side effect requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Broadcast a duel message on the room channel
    Broadcast(Envelope),
    /// Track this client's presence with the given metadata
    Track(Value),
    /// Remove this client's presence
    Untrack,
    /// Tell the presentation layer
    Notify(DuelEvent),
}

pub type Outbox = Vec<Action>;

/// One client's duel state.
pub struct DuelSession<F: SimulationFactory> {
    me: ParticipantId,
    name: String,
    config: DuelConfig,
    factory: F,
    phase: SessionPhase,
    room: Option<RoomCode>,
    view: RoomView,
    round: Option<RoundState>,
    sim: Option<F::Sim>,
    arbiter: Option<RoundArbiter>,
    snapshots: SnapshotStore,
    cadence: SnapshotCadence,
    /// Opponent score last reported to the UI; `None` while not visible
    shown_opponent_score: Option<u32>,
}

impl<F: SimulationFactory> DuelSession<F> {
    /// Creates an idle session.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidConfig`] if `config` does not validate.
    pub fn new(me: ParticipantId, name: &str, config: DuelConfig, factory: F) -> Result<Self, DuelError> {
        config.validate()?;
        let snapshots = SnapshotStore::new(config.staleness_ms);
        let cadence = SnapshotCadence::new(config.snapshot_interval_ms);
        Ok(Self {
            me,
            name: normalize_name(name),
            config,
            factory,
            phase: SessionPhase::Idle,
            room: None,
            view: RoomView::default(),
            round: None,
            sim: None,
            arbiter: None,
            snapshots,
            cadence,
            shown_opponent_score: None,
        })
    }

    pub fn me(&self) -> &ParticipantId {
        &self.me
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn room(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    pub fn view(&self) -> &RoomView {
        &self.view
    }

    pub fn is_host(&self) -> bool {
        self.view.is_host(&self.me)
    }

    pub fn round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    pub fn simulation(&self) -> Option<&F::Sim> {
        self.sim.as_ref()
    }

    /// Enters a room: `idle -> connecting`.
    ///
    /// The caller subscribes the room channel and feeds its status back
    /// through [`on_channel_status`](Self::on_channel_status).
    pub fn connect(&mut self, room: RoomCode) -> Result<Outbox, DuelError> {
        if self.phase != SessionPhase::Idle {
            return Err(self.phase_error("join a room"));
        }
        let mut outbox = Outbox::new();
        info!("🚪 Joining room {}", room);
        outbox.push(Action::Notify(DuelEvent::Status(format!("Connecting to room {room}"))));
        self.room = Some(room);
        self.transition(SessionPhase::Connecting, &mut outbox);
        Ok(outbox)
    }

    /// Reacts to the room channel's status.
    ///
    /// Every successful (re)join tracks presence again and says hello;
    /// presence, not the hello, decides readiness.
    pub fn on_channel_status(&mut self, status: ChannelStatus, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase == SessionPhase::Idle {
            return outbox;
        }

        match status {
            ChannelStatus::Subscribed => {
                if self.phase == SessionPhase::Connecting {
                    self.transition(SessionPhase::WaitingForOpponent, &mut outbox);
                }
                outbox.push(Action::Track(json!({ "name": self.name, "joinedAt": now })));
                let hello = DuelMessage::Hello(Hello { name: self.name.clone() });
                self.send(hello, now, &mut outbox);
                if let Some(room) = &self.room {
                    outbox.push(Action::Notify(DuelEvent::Status(format!("Connected to room {room}"))));
                }
            }
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
                let text = if self.phase == SessionPhase::Connecting {
                    "Room unavailable, retry"
                } else {
                    "Connection lost, reconnecting"
                };
                warn!("📡 Room channel {}: {}", status, text);
                outbox.push(Action::Notify(DuelEvent::Status(text.to_string())));
            }
            ChannelStatus::Closed => {}
        }
        outbox
    }

    /// Recomputes the room from presence keys and applies the consequences:
    /// readiness changes and, mid-round, abandonment when the opponent or
    /// host is gone.
    pub fn on_presence<I, S>(&mut self, keys: I) -> Outbox
    where
        I: IntoIterator<Item = S>,
        S: Into<ParticipantId>,
    {
        let mut outbox = Outbox::new();
        if self.phase == SessionPhase::Idle {
            return outbox;
        }

        let view = RoomView::from_presence(keys);
        if view.host != self.view.host {
            debug!("👑 Host is now {:?}", view.host.as_ref().map(ParticipantId::as_str));
        }
        self.view = view;
        outbox.push(Action::Notify(DuelEvent::Room(self.view.clone())));
        outbox.push(Action::Notify(DuelEvent::Status(self.view.status_text(&self.me))));

        match self.phase {
            SessionPhase::WaitingForOpponent if self.room_ready() => {
                self.transition(SessionPhase::Ready, &mut outbox);
            }
            SessionPhase::Ready if !self.room_ready() => {
                self.transition(SessionPhase::WaitingForOpponent, &mut outbox);
            }
            SessionPhase::RoundActive => {
                let lost = self
                    .round
                    .as_ref()
                    .is_some_and(|round| !self.view.contains(&round.opponent) || !self.view.contains(&round.host));
                if lost {
                    self.abandon_round(&mut outbox);
                }
            }
            _ => {}
        }
        outbox
    }

    /// Starts a round. Host only, in a ready room.
    ///
    /// Picks a seed, derives layouts and the first food, broadcasts `start`
    /// and begins the round locally; both sides step from `startAt`.
    ///
    /// # Errors
    ///
    /// [`DuelError::NotReady`] in a full room or unless exactly two are
    /// present, [`DuelError::InvalidPhase`] outside `ready`,
    /// [`DuelError::NotHost`] for a guest.
    pub fn start_round(&mut self, now: u64) -> Result<Outbox, DuelError> {
        if self.view.is_full() {
            return Err(DuelError::NotReady("room is full".to_string()));
        }
        if self.phase != SessionPhase::Ready {
            return Err(self.phase_error("start a round"));
        }
        if !self.room_ready() {
            return Err(DuelError::NotReady("waiting for opponent".to_string()));
        }
        if !self.is_host() {
            return Err(DuelError::NotHost);
        }

        let seed: u32 = rand::random();
        let layout = round_layout(seed, self.config.grid_size);
        let scores: Scores = self.view.participants.iter().map(|id| (id.clone(), 0)).collect();
        let start = Start {
            seed,
            start_at: now + self.config.start_delay_ms,
            food: layout.food,
            food_version: 1,
            scores,
        };

        let mut outbox = Outbox::new();
        self.send(DuelMessage::Start(start.clone()), now, &mut outbox);
        self.begin_round(&start, self.me.clone(), &mut outbox);
        Ok(outbox)
    }

    /// Decodes and applies one inbound broadcast. Malformed messages,
    /// our own echoes and messages without authority are dropped.
    pub fn handle_broadcast(&mut self, event: &str, payload: &Value, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if matches!(self.phase, SessionPhase::Idle | SessionPhase::Connecting) {
            return outbox;
        }

        let envelope = match Envelope::decode(event, payload, self.config.grid_size) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("🗑️ Dropping '{}' broadcast: {}", event, e);
                return outbox;
            }
        };
        if envelope.from == self.me {
            return outbox;
        }

        let Envelope { from, sent_at, message } = envelope;
        match message {
            DuelMessage::Hello(hello) => {
                outbox.push(Action::Notify(DuelEvent::OpponentHello {
                    id: from,
                    name: normalize_name(&hello.name),
                }));
            }
            DuelMessage::Start(start) => self.on_start(&from, &start, &mut outbox),
            DuelMessage::State(state) => self.on_state(&from, sent_at, state, now, &mut outbox),
            DuelMessage::FoodClaim(claim) => self.on_claim(&from, &claim, sent_at, now),
            DuelMessage::FoodUpdate(update) => self.on_food_update(&from, &update, now, &mut outbox),
            DuelMessage::Result(result) => self.on_result(&from, &result, now, &mut outbox),
        }
        outbox
    }

    /// Advances the local simulation by one tick and reacts to the new
    /// position: crash, collision with a fresh opponent body, or a claim.
    /// Also runs [`poll`](Self::poll).
    pub fn advance(&mut self, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase != SessionPhase::RoundActive {
            return outbox;
        }
        let Some(round) = self.round.as_ref() else {
            return outbox;
        };
        if !round.has_started(now) || round.is_finished() {
            return outbox;
        }
        let opponent = round.opponent.clone();
        let Some(sim) = self.sim.as_mut() else {
            return outbox;
        };

        sim.advance();
        let alive = sim.alive();
        let head = sim.head_cell();

        if !alive {
            self.finish_round(Outcome::Lose, EndCause::Crashed, now, &mut outbox);
            return outbox;
        }
        if let Some(head) = head {
            if collides(head, self.snapshots.fresh(&opponent, now)) {
                self.finish_round(Outcome::Lose, EndCause::Collision, now, &mut outbox);
                return outbox;
            }
            self.submit_claim(head, now, &mut outbox);
        }

        outbox.extend(self.poll(now));
        outbox
    }

    /// Runs timer-driven work: claim resolution on the host, periodic
    /// snapshots and opponent staleness.
    pub fn poll(&mut self, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase != SessionPhase::RoundActive {
            return outbox;
        }

        if let Some(update) = self.resolve_claims(now) {
            self.send(DuelMessage::FoodUpdate(update.clone()), now, &mut outbox);
            self.apply_food_update(&update, now, &mut outbox);
            if self.phase != SessionPhase::RoundActive {
                return outbox;
            }
        }

        let started = self.round.as_ref().is_some_and(|round| round.has_started(now));
        if started && self.cadence.is_due(now) {
            self.push_snapshot(now, &mut outbox);
        }
        self.refresh_opponent_score(now, &mut outbox);
        outbox
    }

    /// Earliest time at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self, now: u64) -> Option<u64> {
        if self.phase != SessionPhase::RoundActive {
            return None;
        }
        let round = self.round.as_ref()?;

        let mut deadlines = Vec::with_capacity(4);
        if round.has_started(now) {
            deadlines.push(self.cadence.next_due().unwrap_or(now));
        } else {
            deadlines.push(round.start_at);
        }
        if let Some(resolve_at) = self.arbiter.as_ref().and_then(RoundArbiter::next_deadline) {
            deadlines.push(resolve_at);
        }
        if self.shown_opponent_score.is_some() {
            if let Some(expiry) = self.snapshots.expires_at(&round.opponent) {
                deadlines.push(expiry);
            }
        }
        deadlines.into_iter().min()
    }

    /// Changes the local heading and sends a snapshot right away.
    pub fn set_heading(&mut self, direction: Direction, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase != SessionPhase::RoundActive {
            return outbox;
        }
        if let Some(sim) = self.sim.as_mut() {
            sim.set_heading(direction);
        }
        if self.round.as_ref().is_some_and(|round| round.has_started(now)) {
            self.push_snapshot(now, &mut outbox);
        }
        outbox
    }

    /// Sends a snapshot outside the periodic cadence.
    pub fn force_resync(&mut self, now: u64) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase == SessionPhase::RoundActive {
            self.push_snapshot(now, &mut outbox);
        }
        outbox
    }

    /// `round-finished -> waiting-for-opponent`, then straight on to
    /// `ready` if both are still present.
    pub fn rematch(&mut self) -> Result<Outbox, DuelError> {
        if self.phase != SessionPhase::RoundFinished {
            return Err(self.phase_error("ask for a rematch"));
        }
        let mut outbox = Outbox::new();
        self.clear_round();
        self.transition(SessionPhase::WaitingForOpponent, &mut outbox);
        if self.room_ready() {
            self.transition(SessionPhase::Ready, &mut outbox);
        }
        Ok(outbox)
    }

    /// Leaves the room. The caller unsubscribes the channel after
    /// performing the returned untrack.
    pub fn leave(&mut self) -> Outbox {
        let mut outbox = Outbox::new();
        if self.phase == SessionPhase::Idle {
            return outbox;
        }
        info!("👋 Leaving room {}", self.room.as_ref().map(RoomCode::as_str).unwrap_or("-"));
        outbox.push(Action::Untrack);
        self.clear_round();
        self.view = RoomView::default();
        self.room = None;
        self.transition(SessionPhase::Idle, &mut outbox);
        outbox.push(Action::Notify(DuelEvent::Status("Left room".to_string())));
        outbox
    }

    fn on_start(&mut self, from: &ParticipantId, start: &Start, outbox: &mut Outbox) {
        if !self.view.is_host(from) {
            debug!("🚫 Ignoring start from non-host {}", from);
            return;
        }
        if !matches!(self.phase, SessionPhase::Ready | SessionPhase::RoundFinished) || !self.room_ready() {
            debug!("🚫 Ignoring start while {}", self.phase);
            return;
        }
        self.begin_round(start, from.clone(), outbox);
    }

    fn begin_round(&mut self, start: &Start, host: ParticipantId, outbox: &mut Outbox) {
        let Some(opponent) = self.view.opponent_of(&self.me).cloned() else {
            return;
        };
        let grid_size = self.config.grid_size;
        let layout = round_layout(start.seed, grid_size);
        let slot = slot_for(&self.me, &opponent);

        let mut sim = self.factory.create(start.seed, grid_size, &layout.slots[slot]);
        sim.set_food(Some(start.food));
        sim.set_score(start.scores.get(&self.me).copied().unwrap_or_default());

        self.arbiter = (host == self.me).then(|| RoundArbiter::new(layout.rng, start, &self.config));
        self.round = Some(RoundState::new(start, host, opponent));
        self.sim = Some(sim);
        self.snapshots.clear();
        self.cadence.reset();
        self.shown_opponent_score = None;

        if self.phase == SessionPhase::RoundFinished {
            self.transition(SessionPhase::WaitingForOpponent, outbox);
        }
        if self.phase == SessionPhase::WaitingForOpponent {
            self.transition(SessionPhase::Ready, outbox);
        }
        self.transition(SessionPhase::RoundActive, outbox);

        info!("🎬 Round starting at {} (seed {}, slot {})", start.start_at, start.seed, slot);
        outbox.push(Action::Notify(DuelEvent::RoundStarting {
            seed: start.seed,
            start_at: start.start_at,
        }));
        outbox.push(Action::Notify(DuelEvent::FoodChanged {
            food: start.food,
            version: start.food_version,
        }));
        outbox.push(Action::Notify(DuelEvent::Scores(start.scores.clone())));
    }

    fn on_state(&mut self, from: &ParticipantId, sent_at: u64, state: StateSnapshot, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if &round.opponent != from {
            return;
        }
        if self.snapshots.store(from, sent_at, state, now) {
            self.refresh_opponent_score(now, outbox);
        }
    }

    fn on_claim(&mut self, from: &ParticipantId, claim: &FoodClaim, sent_at: u64, now: u64) {
        let (Some(arbiter), Some(round)) = (self.arbiter.as_mut(), self.round.as_ref()) else {
            return;
        };
        if round.is_finished() || &round.opponent != from {
            return;
        }
        arbiter.collect(from, claim.food_version, claim.head, sent_at, now);
    }

    fn on_food_update(&mut self, from: &ParticipantId, update: &FoodUpdate, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if &round.host != from {
            debug!("🚫 Ignoring food-update from non-host {}", from);
            return;
        }
        self.apply_food_update(update, now, outbox);
    }

    fn on_result(&mut self, from: &ParticipantId, result: &RoundResult, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if &round.opponent != from || round.is_finished() {
            return;
        }
        self.finish_round(result.result.mirrored(), EndCause::Opponent, now, outbox);
    }

    fn submit_claim(&mut self, head: Cell, now: u64, outbox: &mut Outbox) {
        let Some(version) = self.round.as_mut().and_then(|round| round.try_claim(head)) else {
            return;
        };
        // The host's arbiter takes its own claim directly; the broadcast is
        // for everyone else watching the room.
        if let Some(arbiter) = self.arbiter.as_mut() {
            arbiter.collect(&self.me, version, head, now, now);
        }
        let claim = DuelMessage::FoodClaim(FoodClaim { food_version: version, head });
        self.send(claim, now, outbox);
    }

    fn resolve_claims(&mut self, now: u64) -> Option<FoodUpdate> {
        let due = self
            .arbiter
            .as_ref()
            .and_then(RoundArbiter::next_deadline)
            .is_some_and(|deadline| deadline <= now);
        if !due {
            return None;
        }

        let round = self.round.as_ref()?;
        let own: Vec<Cell> = self
            .sim
            .as_ref()
            .map(|sim| sim.snake_cells().to_vec())
            .unwrap_or_default();
        let theirs: Vec<Cell> = self
            .snapshots
            .latest(&round.opponent)
            .map(|snapshot| snapshot.cells().to_vec())
            .unwrap_or_default();
        self.arbiter.as_mut()?.resolve_due(now, &[&own, &theirs])
    }

    fn apply_food_update(&mut self, update: &FoodUpdate, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        let Some(applied) = round.apply_food_update(update, &self.me) else {
            trace!("🗑️ Stale food-update v{}", update.food_version);
            return;
        };
        let my_score = round.score_of(&self.me);
        let scores = round.scores().clone();

        if let Some(sim) = self.sim.as_mut() {
            sim.set_food(Some(update.food));
            if applied.growth == GrowthOutcome::RolledBack {
                debug!("↩️ Rolling back optimistic growth");
                sim.shrink_tail();
            }
            sim.set_score(my_score);
        }

        outbox.push(Action::Notify(DuelEvent::FoodChanged {
            food: update.food,
            version: update.food_version,
        }));
        outbox.push(Action::Notify(DuelEvent::Scores(scores)));

        if let Some(winner) = applied.winner {
            let outcome = if winner == self.me { Outcome::Win } else { Outcome::Lose };
            self.finish_round(outcome, EndCause::Target, now, outbox);
        }
    }

    /// Ends the round once: final snapshot, the single `result`, and the
    /// move to `round-finished`.
    fn finish_round(&mut self, outcome: Outcome, cause: EndCause, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if !round.finish(outcome, cause) {
            return;
        }
        self.arbiter = None;
        info!("🏆 Round over: {:?} ({:?})", outcome, cause);

        if let Some(snapshot) = self.snapshot_message() {
            self.send(DuelMessage::State(snapshot), now, outbox);
        }
        let send_result = self.round.as_mut().is_some_and(RoundState::take_result_slot);
        if send_result {
            let (score, alive) = self
                .sim
                .as_ref()
                .map(|sim| (sim.score(), sim.alive()))
                .unwrap_or((0, false));
            let result = DuelMessage::Result(RoundResult {
                result: outcome,
                score,
                alive,
                cause: Some(cause),
            });
            self.send(result, now, outbox);
        }

        outbox.push(Action::Notify(DuelEvent::RoundResult {
            outcome,
            cause,
            text: result_text(outcome, cause),
        }));
        self.transition(SessionPhase::RoundFinished, outbox);
    }

    fn abandon_round(&mut self, outbox: &mut Outbox) {
        warn!("🏳️ Opponent left, round abandoned");
        self.clear_round();
        outbox.push(Action::Notify(DuelEvent::RoundAbandoned));
        outbox.push(Action::Notify(DuelEvent::Status("Opponent left, round abandoned".to_string())));
        self.transition(SessionPhase::WaitingForOpponent, outbox);
        if self.room_ready() {
            self.transition(SessionPhase::Ready, outbox);
        }
    }

    fn push_snapshot(&mut self, now: u64, outbox: &mut Outbox) {
        if let Some(snapshot) = self.snapshot_message() {
            self.send(DuelMessage::State(snapshot), now, outbox);
            self.cadence.mark_sent(now);
        }
    }

    fn snapshot_message(&self) -> Option<StateSnapshot> {
        let sim = self.sim.as_ref()?;
        let round = self.round.as_ref()?;
        Some(StateSnapshot {
            score: sim.score(),
            alive: sim.alive(),
            dir: sim.facing(),
            snake: sim.snake_cells().to_vec(),
            food_version: round.food_version(),
            food: Some(round.food()),
            scores: Some(round.scores().clone()),
        })
    }

    fn refresh_opponent_score(&mut self, now: u64, outbox: &mut Outbox) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        let visible = self
            .snapshots
            .fresh(&round.opponent, now)
            .map(|snapshot| snapshot.state.score);
        if visible != self.shown_opponent_score {
            self.shown_opponent_score = visible;
            outbox.push(Action::Notify(DuelEvent::OpponentScore(visible)));
        }
    }

    fn clear_round(&mut self) {
        self.round = None;
        self.sim = None;
        self.arbiter = None;
        self.snapshots.clear();
        self.cadence.reset();
        self.shown_opponent_score = None;
    }

    fn room_ready(&self) -> bool {
        self.view.is_ready() && self.view.contains(&self.me)
    }

    fn send(&self, message: DuelMessage, now: u64, outbox: &mut Outbox) {
        outbox.push(Action::Broadcast(Envelope::new(self.me.clone(), now, message)));
    }

    fn transition(&mut self, next: SessionPhase, outbox: &mut Outbox) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            warn!("⚠️ Refusing phase change {} -> {}", self.phase, next);
            return;
        }
        debug!("🔀 Phase {} -> {}", self.phase, next);
        self.phase = next;
        outbox.push(Action::Notify(DuelEvent::Phase(next)));
    }

    fn phase_error(&self, action: &str) -> DuelError {
        DuelError::InvalidPhase {
            action: action.to_string(),
            phase: self.phase,
        }
    }
}
