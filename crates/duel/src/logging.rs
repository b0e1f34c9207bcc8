//! Log output for the duel tools.
//!
//! The configured level applies to the duel crates only. Everything else,
//! the websocket stack included, stays at `warn` so frame-level chatter from
//! `tungstenite` never drowns out room and round events.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose output follows the configured level.
const DUEL_TARGETS: [&str; 3] = ["lib_duel", "duel_engine", "duel_realtime"];

/// Filter directives for `level`: `warn` globally, `level` for the duel
/// crates.
pub fn filter_directives(level: &str) -> String {
    let mut directives = String::from("warn");
    for target in DUEL_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Installs the global subscriber. `RUST_LOG` replaces the computed
/// directives when set.
///
/// Both formats print the event target, so relay and engine events can be
/// told apart.
pub fn setup_logging(config: &LoggingSettings, json_format: bool) -> Result<(), Box<dyn std::error::Error>> {
    let directives = filter_directives(&config.level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directives)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().compact().with_target(true).with_ansi(true))
            .try_init()?;
    }

    info!("🔧 Logging at {} ({})", config.level, directives);
    Ok(())
}
