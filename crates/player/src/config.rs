use std::time::Duration;

use crate::error::PlayerError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP settings for [`HttpFetcher`](crate::fetcher::HttpFetcher).
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string
    pub user_agent: String,
    /// Overall timeout for a single request (zero disables it)
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

// --- Buffer Configuration ---
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Distance kept around the play position when evicting, so the segment currently
    /// rendering is never removed.
    pub flush_margin: Duration,
    /// Delay before the first back-buffer eviction after a track starts.
    pub flush_behind_delay: Duration,
    /// Cadence of back-buffer eviction.
    pub flush_behind_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_margin: Duration::from_secs(9),
            flush_behind_delay: Duration::from_secs(10),
            flush_behind_interval: Duration::from_secs(2),
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Added to the buffered range end when selecting the next segment, absorbing
    /// rounding at segment boundaries (seconds).
    pub segment_tolerance: f64,
    pub buffer: BufferConfig,
    pub fetcher: FetcherConfig,
    /// Capacity of the notification channel.
    pub event_channel_capacity: usize,
    /// Number of samples kept by the moving averages in [`PlaybackStats`](crate::stats::PlaybackStats).
    pub stats_window: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            segment_tolerance: 0.001,
            buffer: BufferConfig::default(),
            fetcher: FetcherConfig::default(),
            event_channel_capacity: 256,
            stats_window: 3,
        }
    }
}

impl PlayerConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if !self.segment_tolerance.is_finite() || self.segment_tolerance < 0.0 {
            return Err(PlayerError::configuration(format!(
                "segment tolerance must be a non-negative number, got {}",
                self.segment_tolerance
            )));
        }
        if self.buffer.flush_margin.is_zero() {
            return Err(PlayerError::configuration(
                "flush margin must be greater than zero",
            ));
        }
        if self.buffer.flush_behind_interval.is_zero() {
            return Err(PlayerError::configuration(
                "flush-behind interval must be greater than zero",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(PlayerError::configuration(
                "event channel capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}
