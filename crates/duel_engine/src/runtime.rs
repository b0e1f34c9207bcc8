//! Async driver binding a [`DuelSession`] to a room channel.
//!
//! [`spawn_duel`] creates the room channel, wires its status, presence and
//! broadcast callbacks into the session and runs a single task that owns the
//! session. The task multiplexes inbound channel traffic, commands from a
//! [`DuelHandle`], the simulation tick and the session's next timer deadline,
//! and performs every [`Action`] the session returns.

use crate::duel::{Action, DuelSession, Outbox};
use crate::error::DuelError;
use crate::events::DuelEvent;
use crate::simulation::SimulationFactory;
use crate::types::{current_millis, Direction, RoomCode};
use duel_realtime::{
    Channel, ChannelEvent, ChannelOptions, ChannelStatus, EventFilter, ListenerKind, RealtimeClient, RealtimeError,
    PRESENCE_SYNC,
};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Command accepted by a running duel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuelCommand {
    StartRound,
    SetHeading(Direction),
    ForceResync,
    Rematch,
    /// Untracks, unsubscribes and stops the task
    Leave,
}

/// Cloneable handle to a running duel task.
#[derive(Debug, Clone)]
pub struct DuelHandle {
    commands: mpsc::UnboundedSender<DuelCommand>,
}

impl DuelHandle {
    /// Queues a command for the duel task.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::SessionClosed`] if the task has stopped.
    pub fn send(&self, command: DuelCommand) -> Result<(), DuelError> {
        self.commands.send(command).map_err(|_| DuelError::SessionClosed)
    }

    pub fn start_round(&self) -> Result<(), DuelError> {
        self.send(DuelCommand::StartRound)
    }

    pub fn set_heading(&self, direction: Direction) -> Result<(), DuelError> {
        self.send(DuelCommand::SetHeading(direction))
    }

    pub fn rematch(&self) -> Result<(), DuelError> {
        self.send(DuelCommand::Rematch)
    }

    pub fn leave(&self) -> Result<(), DuelError> {
        self.send(DuelCommand::Leave)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// A spawned duel: command handle, UI event stream and the driving task.
pub struct DuelTask {
    pub handle: DuelHandle,
    pub events: mpsc::UnboundedReceiver<DuelEvent>,
    pub task: JoinHandle<()>,
}

enum Inbound {
    Status(ChannelStatus),
    Presence(Vec<String>),
    Broadcast { event: String, payload: Value },
}

/// Joins `room` and starts driving `session` on the current runtime.
///
/// The channel is created with the session's participant id as presence
/// key and without self-broadcast.
///
/// # Errors
///
/// Returns [`DuelError::InvalidPhase`] if `session` is not idle.
pub fn spawn_duel<F>(client: &RealtimeClient, mut session: DuelSession<F>, room: RoomCode) -> Result<DuelTask, DuelError>
where
    F: SimulationFactory + 'static,
{
    let topic = room.topic();
    let initial = session.connect(room)?;

    let channel = client.channel(
        &topic,
        ChannelOptions {
            broadcast_self: false,
            presence_key: session.me().to_string(),
        },
    );

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let presence_tx = inbound_tx.clone();
    channel.on(ListenerKind::Presence, EventFilter::exact(PRESENCE_SYNC), move |event| {
        if let ChannelEvent::PresenceSync(snapshot) = event {
            let _ = presence_tx.send(Inbound::Presence(snapshot.keys().cloned().collect()));
        }
    });
    let broadcast_tx = inbound_tx.clone();
    channel.on(ListenerKind::Broadcast, EventFilter::Any, move |event| {
        if let ChannelEvent::Broadcast { event, payload } = event {
            let _ = broadcast_tx.send(Inbound::Broadcast {
                event: event.clone(),
                payload: payload.clone(),
            });
        }
    });

    perform(&channel, &event_tx, initial);
    channel.subscribe(move |status| {
        let _ = inbound_tx.send(Inbound::Status(status));
    });

    let task = tokio::spawn(run(session, channel, inbound_rx, command_rx, event_tx));
    Ok(DuelTask {
        handle: DuelHandle { commands: command_tx },
        events: event_rx,
        task,
    })
}

async fn run<F>(
    mut session: DuelSession<F>,
    channel: Channel,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut commands: mpsc::UnboundedReceiver<DuelCommand>,
    events: mpsc::UnboundedSender<DuelEvent>,
) where
    F: SimulationFactory,
{
    let mut ticker = time::interval(session.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("🐍 Duel task running on {}", channel.topic());

    loop {
        let now = current_millis();
        let deadline = session
            .next_deadline(now)
            .map(|at| Instant::now() + Duration::from_millis(at.saturating_sub(now)));

        let outbox = tokio::select! {
            Some(message) = inbound.recv() => {
                let now = current_millis();
                match message {
                    Inbound::Status(status) => session.on_channel_status(status, now),
                    Inbound::Presence(keys) => session.on_presence(keys),
                    Inbound::Broadcast { event, payload } => session.handle_broadcast(&event, &payload, now),
                }
            }
            command = commands.recv() => {
                match command {
                    Some(DuelCommand::Leave) | None => {
                        let outbox = session.leave();
                        perform(&channel, &events, outbox);
                        channel.unsubscribe();
                        break;
                    }
                    Some(command) => apply_command(&mut session, command, &events),
                }
            }
            _ = ticker.tick() => session.advance(current_millis()),
            _ = wait_for(deadline) => session.poll(current_millis()),
        };

        perform(&channel, &events, outbox);
    }

    info!("👋 Duel task on {} stopped", channel.topic());
}

fn apply_command<F>(session: &mut DuelSession<F>, command: DuelCommand, events: &mpsc::UnboundedSender<DuelEvent>) -> Outbox
where
    F: SimulationFactory,
{
    let now = current_millis();
    let result = match command {
        DuelCommand::StartRound => session.start_round(now),
        DuelCommand::SetHeading(direction) => Ok(session.set_heading(direction, now)),
        DuelCommand::ForceResync => Ok(session.force_resync(now)),
        DuelCommand::Rematch => session.rematch(),
        DuelCommand::Leave => Ok(session.leave()),
    };

    result.unwrap_or_else(|e| {
        warn!("⚠️ {:?} rejected: {}", command, e);
        let _ = events.send(DuelEvent::Status(e.to_string()));
        Outbox::new()
    })
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Performs session actions against the channel and the event stream.
fn perform(channel: &Channel, events: &mpsc::UnboundedSender<DuelEvent>, outbox: Outbox) {
    for action in outbox {
        match action {
            Action::Broadcast(envelope) => {
                let (event, payload) = match envelope.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!("❌ Failed to encode duel message: {}", e);
                        continue;
                    }
                };
                match channel.broadcast(event, payload) {
                    Ok(()) => trace!("📤 {} on {}", event, channel.topic()),
                    Err(RealtimeError::NotJoined(_)) => trace!("📤 Dropped {} while not joined", event),
                    Err(e) => warn!("📤 Failed to broadcast {}: {}", event, e),
                }
            }
            Action::Track(meta) => {
                if let Err(e) = channel.track(meta) {
                    warn!("👥 Failed to track presence: {}", e);
                }
            }
            Action::Untrack => {
                if let Err(e) = channel.untrack() {
                    debug!("👥 Failed to untrack presence: {}", e);
                }
            }
            Action::Notify(event) => {
                let _ = events.send(event);
            }
        }
    }
}
