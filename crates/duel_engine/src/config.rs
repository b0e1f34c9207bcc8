//! Tunables for a duel: grid, target score and the timing windows.
//!
//! The struct deserializes directly from the `[duel]` section of the
//! application config; every field has a serde default so a partial
//! section is fine.

use crate::error::DuelError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest grid the fixed spawn layouts fit on.
pub const MIN_GRID_SIZE: u32 = 8;

/// Largest supported grid side. Keeps every coordinate and grid area well
/// inside `i32`.
pub const MAX_GRID_SIZE: u32 = 1024;

fn default_grid_size() -> u32 { 20 }
fn default_target_score() -> u32 { 10 }
fn default_claim_window_ms() -> u64 { 60 }
fn default_start_delay_ms() -> u64 { 1_500 }
fn default_snapshot_interval_ms() -> u64 { 100 }
fn default_staleness_ms() -> u64 { 400 }
fn default_tick_ms() -> u64 { 125 }

/// Duel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuelConfig {
    /// Side length of the square grid
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    /// Score that wins the round
    #[serde(default = "default_target_score")]
    pub target_score: u32,
    /// How long the host collects competing claims for one food version
    #[serde(default = "default_claim_window_ms")]
    pub claim_window_ms: u64,
    /// Delay between the `start` message and the first simulation step
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
    /// Minimum interval between periodic snapshots
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    /// Age after which an opponent snapshot counts as absent
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    /// Interval between local simulation steps
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            target_score: default_target_score(),
            claim_window_ms: default_claim_window_ms(),
            start_delay_ms: default_start_delay_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            staleness_ms: default_staleness_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl DuelConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), DuelError> {
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(DuelError::InvalidConfig(format!(
                "grid_size must be between {MIN_GRID_SIZE} and {MAX_GRID_SIZE}, got {}",
                self.grid_size
            )));
        }
        if self.target_score == 0 {
            return Err(DuelError::InvalidConfig("target_score must be positive".to_string()));
        }
        let intervals = [
            ("claim_window_ms", self.claim_window_ms),
            ("snapshot_interval_ms", self.snapshot_interval_ms),
            ("staleness_ms", self.staleness_ms),
            ("tick_ms", self.tick_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(DuelError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Largest snake a snapshot may carry on a `grid_size` grid.
pub fn max_snake_len(grid_size: u32) -> usize {
    (grid_size as usize) * (grid_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DuelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.claim_window_ms, 60);
        assert_eq!(max_snake_len(config.grid_size), 400);
    }

    #[test]
    fn test_small_grid_rejected() {
        let config = DuelConfig {
            grid_size: 7,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DuelError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let at_cap = DuelConfig {
            grid_size: MAX_GRID_SIZE,
            ..Default::default()
        };
        assert!(at_cap.validate().is_ok());

        for grid_size in [MAX_GRID_SIZE + 1, 3_000_000_000] {
            let config = DuelConfig {
                grid_size,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(DuelError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_partial_toml_section_uses_defaults() {
        let config: DuelConfig = serde_json::from_str(r#"{"grid_size": 30}"#).unwrap();
        assert_eq!(config.grid_size, 30);
        assert_eq!(config.target_score, 10);
        assert_eq!(config.staleness_ms, 400);
    }
}
