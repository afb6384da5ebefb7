// In-memory host: a simulated media element used by the CLI and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hls::MediaKind;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PlayerError;
use crate::sink::{BufferSink, MediaChunk, MediaHost, TimeRange, TimeRanges};

/// Ranges closer than this are reported as one.
const MERGE_GAP: f64 = 0.001;

/// Operation recorded by a [`MemorySink`], in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOperation {
    Append {
        span: Option<TimeRange>,
        bytes: usize,
    },
    Remove {
        start: f64,
        end: f64,
    },
}

/// Buffer sink that tracks buffered ranges without decoding anything.
#[derive(Debug)]
pub struct MemorySink {
    kind: MediaKind,
    mime: String,
    ranges: Mutex<Vec<TimeRange>>,
    history: Mutex<Vec<SinkOperation>>,
    append_delay: Option<Duration>,
}

impl MemorySink {
    pub fn new(kind: MediaKind, mime: impl Into<String>) -> Self {
        Self {
            kind,
            mime: mime.into(),
            ranges: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            append_delay: None,
        }
    }

    /// Make every append take `delay` to complete.
    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = Some(delay);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn history(&self) -> Vec<SinkOperation> {
        self.history.lock().clone()
    }

    /// End of the buffered range containing `position`, if any.
    pub fn buffered_end_from(&self, position: f64) -> Option<f64> {
        self.ranges
            .lock()
            .iter()
            .find(|r| r.start - MERGE_GAP <= position && position < r.end)
            .map(|r| r.end)
    }

    fn insert_range(&self, range: TimeRange) {
        let mut ranges = self.ranges.lock();
        ranges.push(range);
        ranges.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
        for r in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end + MERGE_GAP => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        *ranges = merged;
    }

    fn subtract_range(&self, start: f64, end: f64) {
        let mut ranges = self.ranges.lock();
        let mut kept = Vec::with_capacity(ranges.len() + 1);
        for r in ranges.drain(..) {
            if r.end <= start || r.start >= end {
                kept.push(r);
                continue;
            }
            if r.start < start {
                kept.push(TimeRange::new(r.start, start));
            }
            if end < r.end {
                kept.push(TimeRange::new(end, r.end));
            }
        }
        *ranges = kept;
    }
}

#[async_trait]
impl BufferSink for MemorySink {
    async fn append(&self, chunk: MediaChunk) -> Result<(), PlayerError> {
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(span) = chunk.span.filter(|s| !s.is_empty()) {
            self.insert_range(span);
        }
        trace!(kind = %self.kind, span = ?chunk.span, bytes = chunk.data.len(), "Sink append");
        self.history.lock().push(SinkOperation::Append {
            span: chunk.span,
            bytes: chunk.data.len(),
        });
        Ok(())
    }

    async fn remove(&self, start: f64, end: f64) -> Result<(), PlayerError> {
        if start.is_nan() || end.is_nan() || start >= end {
            return Err(PlayerError::sink(
                self.kind,
                format!("invalid removal range [{start}, {end})"),
            ));
        }
        self.subtract_range(start, end);
        trace!(kind = %self.kind, start, end, "Sink remove");
        self.history.lock().push(SinkOperation::Remove { start, end });
        Ok(())
    }

    fn buffered(&self) -> TimeRanges {
        TimeRanges::new(self.ranges.lock().clone())
    }
}

/// Media host with a manually driven clock.
#[derive(Debug, Default)]
pub struct SimulatedHost {
    sinks: Mutex<Vec<Arc<MemorySink>>>,
    position: Mutex<f64>,
    duration: Mutex<Option<f64>>,
    ended: AtomicBool,
    append_delay: Option<Duration>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sinks created by this host complete appends after `delay`.
    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = Some(delay);
        self
    }

    pub fn sink(&self, kind: MediaKind) -> Option<Arc<MemorySink>> {
        self.sinks.lock().iter().find(|s| s.kind() == kind).cloned()
    }

    pub fn set_position(&self, position: f64) {
        *self.position.lock() = position.max(0.0);
    }

    /// Whether `end_of_stream` has been signalled.
    pub fn is_end_of_stream(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Move the clock forward by `dt` seconds, stopping where any track runs out of
    /// buffered data or at the declared duration. Returns the new position.
    pub fn advance(&self, dt: f64) -> f64 {
        let mut position = self.position.lock();
        let mut target = *position + dt.max(0.0);

        for sink in self.sinks.lock().iter() {
            let limit = sink.buffered_end_from(*position).unwrap_or(*position);
            target = target.min(limit);
        }
        if let Some(duration) = *self.duration.lock() {
            target = target.min(duration);
        }

        *position = target.max(*position);
        *position
    }
}

impl MediaHost for SimulatedHost {
    fn add_sink(&self, kind: MediaKind, mime: &str) -> Result<Arc<dyn BufferSink>, PlayerError> {
        let mut sinks = self.sinks.lock();
        if sinks.iter().any(|s| s.kind() == kind) {
            return Err(PlayerError::sink(kind, "sink already exists for track"));
        }

        let mut sink = MemorySink::new(kind, mime);
        if let Some(delay) = self.append_delay {
            sink = sink.with_append_delay(delay);
        }
        let sink = Arc::new(sink);
        sinks.push(sink.clone());
        debug!(%kind, mime, "Created buffer sink");
        Ok(sink)
    }

    fn current_position(&self) -> f64 {
        *self.position.lock()
    }

    fn duration(&self) -> Option<f64> {
        *self.duration.lock()
    }

    fn set_duration(&self, duration: f64) {
        *self.duration.lock() = Some(duration);
    }

    fn has_ended(&self) -> bool {
        if !self.is_end_of_stream() {
            return false;
        }
        match *self.duration.lock() {
            Some(duration) => *self.position.lock() >= duration,
            None => false,
        }
    }

    fn end_of_stream(&self) {
        self.ended.store(true, Ordering::Release);
    }
}
