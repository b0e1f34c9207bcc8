//! # Duel Tools - Main Entry Point
//!
//! Command-line companion for the realtime Snake duel: checks that a relay
//! accepts channel joins, spectates rooms and runs a sparring bot.
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the relay configured in duel.toml
//! duel probe
//!
//! # Spectate a room on another relay
//! duel --url https://project.example.co --api-key <KEY> watch --room ABCDEF
//!
//! # Print a room code, then let a bot wait in it
//! duel create-room
//! duel bot --room ABCDEF --name Sparring
//!
//! # JSON logging
//! duel --json-logs probe
//! ```
//!
//! ## Configuration
//!
//! Settings load from a TOML file (default: `duel.toml`) with `[realtime]`,
//! `[duel]` and `[logging]` sections. A default file is created when the
//! path does not exist. Command-line options override the file.
//!
//! ## Signal Handling
//!
//! `watch` and `bot` run until SIGINT (Ctrl+C) or SIGTERM, then leave the
//! room cleanly.

use tracing::error;

mod app;
mod autopilot;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;

pub use config::{AppConfig, LoggingSettings, RealtimeSettings};

/// Runs the duel tools.
///
/// Parses arguments, loads the configuration, sets up logging and runs the
/// selected mode. Exits the process with status 1 on failure.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration from {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };
    args.apply_overrides(&mut config);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(config, args.mode) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
