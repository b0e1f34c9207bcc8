//! # Duel Engine
//!
//! Rules and arbitration for a two-player realtime Snake duel played over
//! a shared room channel.
//!
//! Each client runs its own snake simulation. The room's host (the smallest
//! participant id present) resolves food: clients claim the food they reached
//! with their send time, the host waits out a short window, awards the food
//! to the earliest claim and broadcasts the next food position with a
//! version number. Everyone else only applies versioned updates, rolling
//! back optimistic growth when a claim loses. Opponent bodies come from
//! periodic snapshots that expire quickly and are never extrapolated.
//!
//! ## Layout
//!
//! * [`DuelSession`] - the synchronous state machine for one client
//! * [`spawn_duel`] - async driver binding a session to a room channel
//! * [`RoundArbiter`] - host-only claim resolution
//! * [`Simulation`] / [`SimulationFactory`] - the seam to the game's own
//!   snake simulation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use duel_engine::{spawn_duel, DuelConfig, DuelSession, GridSimulation, ParticipantId, RoomCode};
//! use duel_engine::layout::SpawnLayout;
//! use duel_realtime::{RealtimeClient, RealtimeConfig};
//!
//! # async fn demo() -> Result<(), duel_engine::DuelError> {
//! let client = RealtimeClient::new(RealtimeConfig::new("https://relay.example.co", "anon-key"))?;
//! let factory = |_seed: u32, grid: u32, spawn: &SpawnLayout| GridSimulation::new(grid, spawn);
//! let session = DuelSession::new(ParticipantId::new(), "Player 1", DuelConfig::default(), factory)?;
//!
//! let mut duel = spawn_duel(&client, session, RoomCode::generate())?;
//! while let Some(event) = duel.events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod config;
pub mod duel;
pub mod error;
pub mod events;
pub mod layout;
pub mod messages;
pub mod rng;
pub mod round;
pub mod runtime;
pub mod session;
pub mod simulation;
pub mod sync;
pub mod types;

pub use arbiter::RoundArbiter;
pub use config::DuelConfig;
pub use duel::{Action, DuelSession, Outbox};
pub use error::DuelError;
pub use events::{result_text, DuelEvent};
pub use messages::{DuelMessage, EndCause, Envelope, Outcome};
pub use round::RoundState;
pub use runtime::{spawn_duel, DuelCommand, DuelHandle, DuelTask};
pub use session::{RoomView, SessionPhase};
pub use simulation::{GridSimulation, Simulation, SimulationFactory};
pub use types::{current_millis, Cell, Direction, ParticipantId, RoomCode, Scores};
