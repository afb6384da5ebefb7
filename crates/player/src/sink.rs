// Host media surface: per-track buffer sinks and the playback clock.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hls::MediaKind;

use crate::error::PlayerError;

/// A half-open `[start, end)` interval on the presentation timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Length of the intersection with `[start, end)`.
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (self.end.min(end) - self.start.max(start)).max(0.0)
    }
}

/// Ordered, disjoint buffered ranges as reported by a sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges(Vec<TimeRange>);

impl TimeRanges {
    pub fn new(ranges: Vec<TimeRange>) -> Self {
        Self(ranges)
    }

    pub fn first(&self) -> Option<TimeRange> {
        self.0.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.0.iter()
    }
}

/// Bytes handed to a sink. `span` is the timeline interval the payload covers; an
/// initialization segment carries none.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub data: Bytes,
    pub span: Option<TimeRange>,
}

impl MediaChunk {
    pub fn init(data: Bytes) -> Self {
        Self { data, span: None }
    }

    pub fn media(data: Bytes, start: f64, end: f64) -> Self {
        Self {
            data,
            span: Some(TimeRange::new(start, end)),
        }
    }
}

/// Per-track media buffer owned by the host.
///
/// The host demuxes what it is given; the engine only appends bytes and evicts
/// timeline ranges. Both operations complete asynchronously and are never overlapped
/// by the engine for a given sink.
#[async_trait]
pub trait BufferSink: Send + Sync {
    async fn append(&self, chunk: MediaChunk) -> Result<(), PlayerError>;

    /// Evict `[start, end)`. `end` may be `f64::INFINITY`.
    async fn remove(&self, start: f64, end: f64) -> Result<(), PlayerError>;

    fn buffered(&self) -> TimeRanges;
}

/// Media element attached to the session: creates sinks and owns the clock.
pub trait MediaHost: Send + Sync {
    /// Create a sink for one track. `mime` is e.g. `video/mp4; codecs="avc1.4d401e"`.
    fn add_sink(&self, kind: MediaKind, mime: &str) -> Result<Arc<dyn BufferSink>, PlayerError>;

    /// Current play position in seconds.
    fn current_position(&self) -> f64;

    /// Presentation duration, once declared.
    fn duration(&self) -> Option<f64>;

    fn set_duration(&self, duration: f64);

    /// Whether playback has reached the end of the stream.
    fn has_ended(&self) -> bool;

    /// Signal that no further data will be appended.
    fn end_of_stream(&self);
}

/// MIME type used to create a track's sink.
pub fn sink_mime(kind: MediaKind, codec: Option<&str>) -> String {
    match codec {
        Some(codec) => format!("{kind}/mp4; codecs=\"{codec}\""),
        None => format!("{kind}/mp4"),
    }
}
