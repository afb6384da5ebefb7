// Notification channel: typed broadcast of playback events.

use std::sync::Arc;

use hls::{MediaKind, Segment, VariantLevel};
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity for the event broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of a track's forward/back buffer, published after every completed sink
/// append or removal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BufferMetrics {
    /// Play position the snapshot was taken at (seconds).
    pub position: f64,
    /// Start of the first buffered range.
    pub start: f64,
    /// End of the first buffered range.
    pub end: f64,
    /// `end - start`.
    pub seconds: f64,
    /// `end - position`; negative when the position is past the buffered range.
    pub forward: f64,
    /// `position - start`; negative when the position is before the buffered range.
    pub backward: f64,
    /// Number of ledger segments overlapping the buffered range.
    pub segments: usize,
    /// Bytes held in the buffered range, proportional to overlap.
    pub bytes: f64,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The video track switched (or is about to switch) to a new quality level.
    VariantLevelChange { variant: Arc<VariantLevel> },
    /// A video content segment finished downloading. Its metrics are set.
    SegmentLoaded { segment: Arc<Segment> },
    /// Buffer snapshot following a video sink append or removal.
    BufferMetricsUpdated(BufferMetrics),
    /// A track reached the end of its playlist.
    TrackEnded { kind: MediaKind },
    /// A track stopped loading after an unrecoverable error.
    TrackStalled { kind: MediaKind, reason: String },
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::VariantLevelChange { .. } => "variant_level_change",
            PlayerEvent::SegmentLoaded { .. } => "segment_loaded",
            PlayerEvent::BufferMetricsUpdated(_) => "buffer_metrics_updated",
            PlayerEvent::TrackEnded { .. } => "track_ended",
            PlayerEvent::TrackStalled { .. } => "track_stalled",
        }
    }
}

/// Session-scoped publish/subscribe channel.
///
/// Cloning yields another handle to the same channel. Subscribers only see events
/// published after they subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to every current subscriber.
    pub fn publish(&self, event: PlayerEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "Published event"),
            Err(_) => trace!(event = name, "No subscribers for event"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
