//! Configuration management for the duel tools.
//!
//! Settings are loaded from a TOML file with `[realtime]`, `[duel]` and
//! `[logging]` sections. Every field has a default, so a partial file is
//! fine; a missing file is created with the defaults.

use duel_engine::DuelConfig;
use duel_realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_url() -> String { "http://127.0.0.1:54321".to_string() }
fn default_connect_timeout_ms() -> u64 { 8_000 }
fn default_heartbeat_interval_ms() -> u64 { 25_000 }
fn default_reconnect_delay_ms() -> u64 { 1_200 }
fn default_join_timeout_ms() -> u64 { 10_000 }
fn default_log_level() -> String { "info".to_string() }

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relay endpoint and protocol timings
    #[serde(default)]
    pub realtime: RealtimeSettings,
    /// Duel rules and timings
    #[serde(default)]
    pub duel: DuelConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Relay connection settings. Timings are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSettings {
    /// Relay base URL (`http(s)://` or `ws(s)://`)
    #[serde(default = "default_url")]
    pub url: String,
    /// Public API key sent with the socket URL
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl RealtimeSettings {
    /// Converts the settings into the client configuration.
    pub fn to_realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            base_url: self.url.clone(),
            api_key: self.api_key.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates it with default values.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or (when missing) written.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration.
    ///
    /// Checks the relay URL and timings, the duel rules and the log level.
    pub fn validate(&self) -> Result<(), String> {
        self.realtime
            .to_realtime_config()
            .validate()
            .map_err(|e| format!("[realtime] {e}"))?;

        self.duel.validate().map_err(|e| format!("[duel] {e}"))?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
