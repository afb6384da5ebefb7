// Buffer Manager: serialized access to one track's sink plus the segment ledger.

use std::sync::Arc;

use bytes::Bytes;
use hls::{MapSegment, MediaKind, Segment};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PlayerError;
use crate::events::{BufferMetrics, EventBus, PlayerEvent};
use crate::sink::{BufferSink, MediaChunk, MediaHost};

/// Something that can be appended to a sink.
#[derive(Debug, Clone)]
pub enum SegmentRef {
    Map(Arc<MapSegment>),
    Content(Arc<Segment>),
}

impl SegmentRef {
    pub fn url(&self) -> &str {
        match self {
            SegmentRef::Map(map) => &map.url,
            SegmentRef::Content(segment) => &segment.url,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    current_map: Option<Arc<MapSegment>>,
    /// Content segments appended and not yet known to be evicted.
    buffered_segments: Vec<Arc<Segment>>,
}

pub struct BufferManager {
    kind: MediaKind,
    sink: Arc<dyn BufferSink>,
    host: Arc<dyn MediaHost>,
    /// Held across every sink operation so at most one is in flight.
    gate: tokio::sync::Mutex<()>,
    ledger: Mutex<Ledger>,
    flush_margin: f64,
    metrics_events: Option<EventBus>,
}

impl BufferManager {
    pub fn new(
        kind: MediaKind,
        sink: Arc<dyn BufferSink>,
        host: Arc<dyn MediaHost>,
        flush_margin: f64,
    ) -> Self {
        Self {
            kind,
            sink,
            host,
            gate: tokio::sync::Mutex::new(()),
            ledger: Mutex::new(Ledger::default()),
            flush_margin,
            metrics_events: None,
        }
    }

    /// Publish a [`PlayerEvent::BufferMetricsUpdated`] after every completed append or
    /// removal.
    pub fn with_metrics_events(mut self, events: EventBus) -> Self {
        self.metrics_events = Some(events);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Append a downloaded segment to the sink.
    ///
    /// A map becomes the current map and a content segment joins the ledger before the
    /// append is issued. Waits for any sink operation already in flight.
    pub async fn append_segment(&self, segment: &SegmentRef, data: Bytes) -> Result<(), PlayerError> {
        let _gate = self.gate.lock().await;

        let chunk = {
            let mut ledger = self.ledger.lock();
            match segment {
                SegmentRef::Map(map) => {
                    ledger.current_map = Some(map.clone());
                    MediaChunk::init(data)
                }
                SegmentRef::Content(content) => {
                    ledger.buffered_segments.push(content.clone());
                    MediaChunk::media(data, content.start, content.end())
                }
            }
        };

        trace!(kind = %self.kind, url = segment.url(), "Appending segment");
        self.sink.append(chunk).await?;
        self.publish_metrics();
        Ok(())
    }

    /// Evict everything from `position + margin` onwards so a new quality level can
    /// replace it. Does nothing while the duration is unknown, when the cut point is not
    /// before the end of the presentation, or when nothing is buffered.
    pub async fn flush_ahead(&self) -> Result<(), PlayerError> {
        let _gate = self.gate.lock().await;

        let Some(duration) = self.host.duration() else {
            return Ok(());
        };
        let start = self.host.current_position() + self.flush_margin;
        if start >= duration || self.sink.buffered().is_empty() {
            return Ok(());
        }

        debug!(kind = %self.kind, start, "Flushing forward buffer");
        self.sink.remove(start, f64::INFINITY).await?;
        self.publish_metrics();
        Ok(())
    }

    /// Evict everything older than `position - margin`.
    pub async fn flush_behind(&self) -> Result<(), PlayerError> {
        let _gate = self.gate.lock().await;

        let end = self.host.current_position() - self.flush_margin;
        let within_duration = self.host.duration().is_some_and(|d| end < d);
        if end <= 0.0 || !within_duration {
            return Ok(());
        }
        if self.sink.buffered().iter().all(|r| r.start >= end) {
            return Ok(());
        }

        debug!(kind = %self.kind, end, "Flushing back buffer");
        self.sink.remove(0.0, end).await?;
        self.publish_metrics();
        Ok(())
    }

    /// Called with the gate held, after the sink settled.
    fn publish_metrics(&self) {
        if let Some(events) = &self.metrics_events {
            let metrics = self.compute_metrics();
            events.publish(PlayerEvent::BufferMetricsUpdated(metrics));
        }
    }

    pub fn current_map(&self) -> Option<Arc<MapSegment>> {
        self.ledger.lock().current_map.clone()
    }

    /// Whether `map` is the initialization segment last appended to this sink.
    pub fn current_map_is(&self, map: &Arc<MapSegment>) -> bool {
        self.ledger
            .lock()
            .current_map
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, map))
    }

    /// End of the first buffered range, 0 when nothing is buffered.
    pub fn buffered_range_end(&self) -> f64 {
        self.sink.buffered().first().map_or(0.0, |r| r.end)
    }

    /// Whether a sink operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Snapshot the first buffered range and prune ledger entries that no longer
    /// overlap it.
    pub fn compute_metrics(&self) -> BufferMetrics {
        let position = self.host.current_position();
        let buffered = self.sink.buffered();
        let mut ledger = self.ledger.lock();

        let Some(range) = buffered.first() else {
            ledger.buffered_segments.clear();
            return BufferMetrics {
                position,
                ..Default::default()
            };
        };

        ledger
            .buffered_segments
            .retain(|s| s.end() > range.start && s.start < range.end);

        let bytes = ledger
            .buffered_segments
            .iter()
            .map(|s| {
                let Some(byte_length) = s.byte_length() else {
                    return 0.0;
                };
                if s.start >= range.start && s.end() <= range.end {
                    byte_length as f64
                } else if s.length > 0.0 {
                    byte_length as f64 * range.overlap(s.start, s.end()) / s.length
                } else {
                    0.0
                }
            })
            .sum();

        BufferMetrics {
            position,
            start: range.start,
            end: range.end,
            seconds: range.len(),
            forward: range.end - position,
            backward: position - range.start,
            segments: ledger.buffered_segments.len(),
            bytes,
        }
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("kind", &self.kind)
            .field("flush_margin", &self.flush_margin)
            .finish_non_exhaustive()
    }
}
