//! Command-line interface handling for the duel tools.
//!
//! Global options override the configuration file; the subcommand picks
//! what to do.

use crate::config::AppConfig;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// What the binary should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Connect, join a throwaway channel, report the status and leave
    Probe,
    /// Spectate a room without tracking presence
    Watch { room: String },
    /// Print a fresh room code
    CreateRoom,
    /// Play in a room with a headless autopilot snake
    Bot { room: Option<String>, name: String },
}

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the relay URL
    pub url: Option<String>,
    /// Optional override for the relay API key
    pub api_key: Option<String>,
    pub mode: Mode,
}

fn command() -> Command {
    let room = Arg::new("room")
        .short('r')
        .long("room")
        .value_name("CODE")
        .help("Six-letter room code");

    Command::new("duel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Realtime Snake duel tools: relay probe, room spectator and sparring bot")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("duel.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .global(true),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .value_name("URL")
                .help("Relay base URL (e.g., https://project.example.co)")
                .global(true),
        )
        .arg(
            Arg::new("api-key")
                .short('k')
                .long("api-key")
                .value_name("KEY")
                .help("Relay API key")
                .global(true),
        )
        .subcommand(Command::new("probe").about("Check that the relay accepts a channel join"))
        .subcommand(
            Command::new("watch")
                .about("Spectate a room: presence, host and duel traffic")
                .arg(room.clone().required(true)),
        )
        .subcommand(Command::new("create-room").about("Print a fresh room code"))
        .subcommand(
            Command::new("bot")
                .about("Join (or create) a room and play with an autopilot snake")
                .arg(room)
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Display name")
                        .default_value("Bot"),
                ),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.url {
            config.realtime.url = url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.realtime.api_key = api_key.clone();
        }
        if let Some(log_level) = &self.log_level {
            config.logging.level = log_level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        let mode = match matches.subcommand() {
            Some(("watch", sub)) => Mode::Watch {
                room: sub.get_one::<String>("room").cloned().unwrap_or_default(),
            },
            Some(("create-room", _)) => Mode::CreateRoom,
            Some(("bot", sub)) => Mode::Bot {
                room: sub.get_one::<String>("room").cloned(),
                name: sub.get_one::<String>("name").cloned().unwrap_or_default(),
            },
            _ => Mode::Probe,
        };

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("duel.toml"),
            ),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            url: matches.get_one::<String>("url").cloned(),
            api_key: matches.get_one::<String>("api-key").cloned(),
            mode,
        }
    }
}
