use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use player_engine::{BufferConfig, FetcherConfig, PlayerConfig};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;

/// Settings read from the optional TOML configuration file.
///
/// ```toml
/// segment_tolerance = 0.001
/// flush_margin_secs = 9.0
/// timeout_secs = 30
///
/// [headers]
/// Referer = "https://example.com/"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub segment_tolerance: f64,
    pub flush_margin_secs: f64,
    pub flush_behind_delay_secs: f64,
    pub flush_behind_interval_secs: f64,
    pub event_channel_capacity: usize,
    pub stats_window: usize,
    pub user_agent: Option<String>,
    /// Whole-request timeout, 0 disables it
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub headers: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let player = PlayerConfig::default();
        Self {
            segment_tolerance: player.segment_tolerance,
            flush_margin_secs: player.buffer.flush_margin.as_secs_f64(),
            flush_behind_delay_secs: player.buffer.flush_behind_delay.as_secs_f64(),
            flush_behind_interval_secs: player.buffer.flush_behind_interval.as_secs_f64(),
            event_channel_capacity: player.event_channel_capacity,
            stats_window: player.stats_window,
            user_agent: None,
            timeout_secs: player.fetcher.timeout.as_secs(),
            connect_timeout_secs: player.fetcher.connect_timeout.as_secs(),
            headers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn into_player_config(self) -> PlayerConfig {
        let defaults = FetcherConfig::default();
        PlayerConfig {
            segment_tolerance: self.segment_tolerance,
            buffer: BufferConfig {
                flush_margin: secs(self.flush_margin_secs),
                flush_behind_delay: secs(self.flush_behind_delay_secs),
                flush_behind_interval: secs(self.flush_behind_interval_secs),
            },
            fetcher: FetcherConfig {
                user_agent: self.user_agent.unwrap_or(defaults.user_agent),
                timeout: Duration::from_secs(self.timeout_secs),
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                headers: self.headers.into_iter().collect(),
            },
            event_channel_capacity: self.event_channel_capacity,
            stats_window: self.stats_window,
        }
    }
}

/// Negative or non-finite values become zero; `PlayerConfig::validate` rejects a zero
/// flush margin or flush-behind interval.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
