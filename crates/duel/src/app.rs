//! Application lifecycle for the duel tools.
//!
//! [`Application`] validates the merged configuration and runs the selected
//! mode until it completes or a shutdown signal arrives.

use crate::autopilot::Autopilot;
use crate::cli::{CliArgs, Mode};
use crate::config::AppConfig;
use crate::signals::wait_for_shutdown;
use duel_engine::layout::SpawnLayout;
use duel_engine::{
    spawn_duel, DuelEvent, DuelSession, DuelTask, Envelope, ParticipantId, RoomCode, RoomView, SessionPhase,
};
use duel_realtime::{
    ChannelEvent, ChannelOptions, ChannelStatus, EventFilter, ListenerKind, RealtimeClient, PRESENCE_SYNC,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Runs one mode of the duel tools.
pub struct Application {
    config: AppConfig,
    mode: Mode,
}

impl Application {
    /// Creates the application from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: AppConfig, mode: Mode) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");
        Ok(Self { config, mode })
    }

    /// Runs the selected mode.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        match self.mode.clone() {
            Mode::CreateRoom => {
                println!("{}", RoomCode::generate());
                Ok(())
            }
            Mode::Probe => self.probe().await,
            Mode::Watch { room } => self.watch(RoomCode::parse(&room)?).await,
            Mode::Bot { room, name } => {
                let room = match room {
                    Some(code) => RoomCode::parse(&code)?,
                    None => {
                        let code = RoomCode::generate();
                        info!("🆕 Created room {}", code);
                        code
                    }
                };
                self.bot(room, &name).await
            }
        }
    }

    fn client(&self) -> Result<RealtimeClient, Box<dyn std::error::Error>> {
        let realtime = self.config.realtime.to_realtime_config();
        info!("🌐 Relay: {}", realtime.base_url);
        Ok(RealtimeClient::new(realtime)?)
    }

    /// Joins a throwaway channel and reports the first status.
    async fn probe(&self) -> Result<(), Box<dyn std::error::Error>> {
        let client = self.client()?;
        let probe_id = ParticipantId::new();
        let channel = client.channel(
            &format!("probe-{probe_id}"),
            ChannelOptions {
                broadcast_self: false,
                presence_key: probe_id.to_string(),
            },
        );

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        channel.subscribe(move |status| {
            let _ = status_tx.send(status);
        });

        let budget = client.config().connect_timeout + client.config().join_timeout + Duration::from_secs(1);
        let status = tokio::time::timeout(budget, status_rx.recv()).await;
        channel.unsubscribe();

        match status {
            Ok(Some(ChannelStatus::Subscribed)) => {
                info!("✅ Relay reachable, joined {}", channel.topic());
                Ok(())
            }
            Ok(Some(status)) => Err(format!("Probe failed: channel reported {status}").into()),
            Ok(None) | Err(_) => Err("Probe failed: no channel status".into()),
        }
    }

    /// Spectates a room until interrupted. Never tracks presence.
    async fn watch(&self, room: RoomCode) -> Result<(), Box<dyn std::error::Error>> {
        let client = self.client()?;
        let grid_size = self.config.duel.grid_size;
        let channel = client.channel(
            &room.topic(),
            ChannelOptions {
                broadcast_self: false,
                presence_key: format!("watcher-{}", ParticipantId::new()),
            },
        );

        channel.on(ListenerKind::Presence, EventFilter::exact(PRESENCE_SYNC), |event| {
            if let ChannelEvent::PresenceSync(snapshot) = event {
                let view = RoomView::from_presence(snapshot.keys().cloned());
                let ids: Vec<&str> = view.participants.iter().map(ParticipantId::as_str).collect();
                info!(
                    "👥 Present: {:?} | host: {} | ready: {}",
                    ids,
                    view.host.as_ref().map(ParticipantId::as_str).unwrap_or("-"),
                    view.is_ready()
                );
            }
        });
        channel.on(ListenerKind::Broadcast, EventFilter::Any, move |event| {
            if let ChannelEvent::Broadcast { event, payload } = event {
                match Envelope::decode(event, payload, grid_size) {
                    Ok(envelope) => info!("📨 {} from {} at {}: {:?}", event, envelope.from, envelope.sent_at, envelope.message),
                    Err(e) => warn!("🗑️ Undecodable '{}' broadcast: {}", event, e),
                }
            }
        });
        channel.subscribe(|status| match status {
            ChannelStatus::Subscribed => info!("📡 Watching room channel"),
            other => warn!("📡 Room channel {}", other),
        });

        info!("👀 Watching room {} (Ctrl+C to stop)", room);
        wait_for_shutdown().await?;
        channel.unsubscribe();
        Ok(())
    }

    /// Plays in a room with an autopilot snake until interrupted. Starts a
    /// round whenever this bot is host of a ready room and asks for a
    /// rematch after every result.
    async fn bot(&self, room: RoomCode, name: &str) -> Result<(), Box<dyn std::error::Error>> {
        let client = self.client()?;
        let factory = |_seed: u32, grid_size: u32, spawn: &SpawnLayout| Autopilot::new(grid_size, spawn);
        let session = DuelSession::new(ParticipantId::new(), name, self.config.duel.clone(), factory)?;
        let me = session.me().clone();
        info!("🤖 Bot {} ({}) joining room {}", session.name(), me, room);

        let DuelTask { handle, mut events, task } = spawn_duel(&client, session, room)?;
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);
        let mut view = RoomView::default();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match event {
                        DuelEvent::Room(room_view) => view = room_view,
                        DuelEvent::Phase(SessionPhase::Ready) if view.is_host(&me) => {
                            info!("🎮 Room ready, starting a round");
                            handle.start_round()?;
                        }
                        DuelEvent::Phase(phase) => debug!("🔀 Phase: {}", phase),
                        DuelEvent::Status(text) => info!("📋 {}", text),
                        DuelEvent::OpponentHello { id, name } => info!("👋 {} ({}) is here", name, id),
                        DuelEvent::RoundStarting { seed, start_at } => info!("🎬 Round (seed {}) starts at {}", seed, start_at),
                        DuelEvent::Scores(scores) => debug!("📊 Scores: {:?}", scores),
                        DuelEvent::RoundResult { text, .. } => {
                            info!("🏁 {}", text);
                            handle.rematch()?;
                        }
                        DuelEvent::RoundAbandoned => warn!("🏳️ Round abandoned"),
                        DuelEvent::FoodChanged { .. } | DuelEvent::OpponentScore(_) => {}
                    }
                }
                result = &mut shutdown => {
                    result?;
                    handle.leave()?;
                    break;
                }
            }
        }

        if let Err(e) = task.await {
            error!("❌ Duel task failed: {}", e);
        }
        Ok(())
    }
}
