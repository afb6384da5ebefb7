// Playback statistics: moving averages over segment downloads and buffer snapshots.

use std::collections::VecDeque;
use std::time::Duration;

use hls::{NetworkMetrics, VariantLevel};

use crate::events::{BufferMetrics, PlayerEvent};

const BYTES_PER_MEGABYTE: f64 = 1_000_000.0;

/// Point-in-time view of [`PlaybackStats`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Average segment latency in milliseconds.
    pub average_latency_ms: Option<f64>,
    /// Download rate over the sampled segments, MB per second.
    pub download_rate: Option<f64>,
    /// Average buffered megabytes per buffered second.
    pub playback_rate: Option<f64>,
    pub buffer_seconds: f64,
    pub buffer_megabytes: f64,
}

/// Consumer of [`PlayerEvent`]s that keeps moving averages of the last few samples.
#[derive(Debug, Clone)]
pub struct PlaybackStats {
    window: usize,
    segments: VecDeque<NetworkMetrics>,
    playback_rates: VecDeque<f64>,
    last_buffer: Option<BufferMetrics>,
}

impl PlaybackStats {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            segments: VecDeque::with_capacity(window),
            playback_rates: VecDeque::with_capacity(window),
            last_buffer: None,
        }
    }

    /// Feed an event. Returns `true` if it changed the statistics.
    pub fn observe(&mut self, event: &PlayerEvent) -> bool {
        match event {
            PlayerEvent::SegmentLoaded { segment } => match segment.metrics() {
                Some(metrics) => {
                    self.record_segment(metrics);
                    true
                }
                None => false,
            },
            PlayerEvent::BufferMetricsUpdated(metrics) => {
                self.record_buffer(metrics);
                true
            }
            _ => false,
        }
    }

    pub fn record_segment(&mut self, metrics: NetworkMetrics) {
        push_bounded(&mut self.segments, metrics, self.window);
    }

    /// Record a buffer snapshot. Snapshots of an empty buffer update the size but add
    /// no playback-rate sample.
    pub fn record_buffer(&mut self, metrics: &BufferMetrics) {
        self.last_buffer = Some(*metrics);
        if metrics.seconds > 0.0 {
            let rate = (metrics.bytes / BYTES_PER_MEGABYTE) / metrics.seconds;
            push_bounded(&mut self.playback_rates, rate, self.window);
        }
    }

    pub fn average_latency(&self) -> Option<Duration> {
        if self.segments.is_empty() {
            return None;
        }
        let total: Duration = self.segments.iter().map(|m| m.latency).sum();
        Some(total / self.segments.len() as u32)
    }

    pub fn download_rate(&self) -> Option<f64> {
        let latency: Duration = self.segments.iter().map(|m| m.latency).sum();
        if latency.is_zero() {
            return None;
        }
        let bytes: u64 = self.segments.iter().map(|m| m.byte_length).sum();
        Some((bytes as f64 / BYTES_PER_MEGABYTE) / latency.as_secs_f64())
    }

    pub fn playback_rate(&self) -> Option<f64> {
        if self.playback_rates.is_empty() {
            return None;
        }
        Some(self.playback_rates.iter().sum::<f64>() / self.playback_rates.len() as f64)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let buffer = self.last_buffer.unwrap_or_default();
        StatsSnapshot {
            average_latency_ms: self.average_latency().map(|d| d.as_secs_f64() * 1000.0),
            download_rate: self.download_rate(),
            playback_rate: self.playback_rate(),
            buffer_seconds: buffer.seconds,
            buffer_megabytes: buffer.bytes / BYTES_PER_MEGABYTE,
        }
    }
}

impl Default for PlaybackStats {
    fn default() -> Self {
        Self::new(3)
    }
}

fn push_bounded<T>(samples: &mut VecDeque<T>, value: T, window: usize) {
    samples.push_back(value);
    while samples.len() > window {
        samples.pop_front();
    }
}

/// Human-readable summary of a variant: `"[2]1920x1080 / 0.625 MB per second"`.
pub fn describe_variant(variant: &VariantLevel) -> String {
    let megabytes_per_second = variant.effective_bitrate().unwrap_or(0) as f64 / 8.0 / BYTES_PER_MEGABYTE;
    format!("{} / {:.3} MB per second", variant.id, megabytes_per_second)
}
