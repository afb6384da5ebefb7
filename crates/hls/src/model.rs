// Playlist model: master/media playlist entities and position lookup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use media_types::Resolution;

/// Track type a playlist or segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a playlist-relative path against the URL of the playlist that referenced it.
///
/// This is a textual operation: the last path component of `base` is replaced by `path`,
/// so only siblings of the referencing playlist are supported. Absolute `http(s)` URLs
/// are passed through untouched.
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let path = path.trim_start_matches('/');
    match base.rfind('/') {
        Some(idx) => format!("{}{}", &base[..=idx], path),
        None => path.to_string(),
    }
}

/// Download metrics attached to a content segment once it has been fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkMetrics {
    /// Size of the payload in bytes.
    pub byte_length: u64,
    /// Time from response headers to the complete payload.
    pub latency: Duration,
}

/// An initialization ("map") segment.
#[derive(Debug, PartialEq, Eq)]
pub struct MapSegment {
    pub url: String,
}

impl MapSegment {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A content segment of a media playlist, positioned on the presentation timeline.
#[derive(Debug)]
pub struct Segment {
    pub kind: MediaKind,
    pub playlist_id: Arc<str>,
    /// Presentation start in seconds.
    pub start: f64,
    /// Play length in seconds.
    pub length: f64,
    pub url: String,
    metrics: OnceLock<NetworkMetrics>,
}

impl Segment {
    pub fn new(
        kind: MediaKind,
        playlist_id: Arc<str>,
        start: f64,
        length: f64,
        url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            playlist_id,
            start,
            length,
            url: url.into(),
            metrics: OnceLock::new(),
        }
    }

    /// Presentation end in seconds.
    #[inline]
    pub fn end(&self) -> f64 {
        self.start + self.length
    }

    #[inline]
    pub fn contains(&self, position: f64) -> bool {
        self.start <= position && position < self.end()
    }

    /// Attach download metrics. Only the first call has an effect.
    pub fn record_metrics(&self, metrics: NetworkMetrics) -> bool {
        self.metrics.set(metrics).is_ok()
    }

    pub fn metrics(&self) -> Option<NetworkMetrics> {
        self.metrics.get().copied()
    }

    pub fn byte_length(&self) -> Option<u64> {
        self.metrics.get().map(|m| m.byte_length)
    }
}

/// Parsed body of a media playlist.
#[derive(Debug)]
struct PlaylistContent {
    map: Option<Arc<MapSegment>>,
    segments: Vec<Arc<Segment>>,
    /// Total duration in seconds.
    duration: f64,
}

/// A media playlist referenced from a master playlist. Its content is loaded lazily, once.
#[derive(Debug)]
pub struct MediaPlaylist {
    pub id: Arc<str>,
    pub url: String,
    pub kind: MediaKind,
    content: OnceLock<PlaylistContent>,
}

impl MediaPlaylist {
    pub fn new(id: impl Into<Arc<str>>, url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            content: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.content.get().is_some()
    }

    /// One-time initialization of the playlist body.
    ///
    /// Returns `false` and leaves the existing content untouched if the playlist was
    /// already populated.
    pub fn add_segments(
        &self,
        map: Option<Arc<MapSegment>>,
        segments: Vec<Arc<Segment>>,
        duration: f64,
    ) -> bool {
        self.content
            .set(PlaylistContent {
                map,
                segments,
                duration,
            })
            .is_ok()
    }

    pub fn map(&self) -> Option<&Arc<MapSegment>> {
        self.content.get().and_then(|c| c.map.as_ref())
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        self.content
            .get()
            .map(|c| c.segments.as_slice())
            .unwrap_or(&[])
    }

    pub fn duration(&self) -> Option<f64> {
        self.content.get().map(|c| c.duration)
    }

    /// Find the segment whose `[start, end)` interval contains `position`.
    ///
    /// Binary search over the ordered segment list; a position exactly on a boundary
    /// belongs to the later segment. Returns `None` past the end of the playlist.
    pub fn segment_for_position(&self, position: f64) -> Option<Arc<Segment>> {
        let segments = self.segments();
        let idx = segments.partition_point(|seg| seg.end() <= position);
        segments
            .get(idx)
            .filter(|seg| seg.contains(position))
            .cloned()
    }
}

/// One `#EXT-X-STREAM-INF` entry, ranked by bitrate.
#[derive(Debug)]
pub struct VariantLevel {
    /// Rank, 0 being the lowest bitrate.
    pub index: usize,
    /// Display identifier, `[index]resolution`.
    pub id: String,
    pub peak_bitrate: Option<u64>,
    pub average_bitrate: Option<u64>,
    pub resolution: Option<Resolution>,
    pub audio_group_id: Option<String>,
    pub codecs: Vec<String>,
    pub playlist: MediaPlaylist,
}

impl VariantLevel {
    pub fn video_codec(&self) -> Option<&str> {
        self.codecs
            .iter()
            .map(String::as_str)
            .find(|c| c.starts_with("avc"))
    }

    pub fn audio_codec(&self) -> Option<&str> {
        self.codecs
            .iter()
            .map(String::as_str)
            .find(|c| c.starts_with("mp4a"))
    }

    /// Average bitrate when advertised, peak bitrate otherwise.
    pub fn effective_bitrate(&self) -> Option<u64> {
        self.average_bitrate.or(self.peak_bitrate)
    }
}

/// An audio rendition declared by `#EXT-X-MEDIA`.
#[derive(Debug)]
pub struct AudioRendition {
    pub group_id: String,
    pub id: String,
    pub name: Option<String>,
    pub language: Option<String>,
    pub is_default: bool,
    pub playlist: MediaPlaylist,
}

/// A named bucket of renditions sharing a `GROUP-ID`.
#[derive(Debug)]
pub struct RenditionGroup {
    pub kind: MediaKind,
    pub id: String,
    pub renditions: Vec<Arc<AudioRendition>>,
}

impl RenditionGroup {
    pub fn new(kind: MediaKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            renditions: Vec::new(),
        }
    }

    pub fn add_rendition(&mut self, rendition: Arc<AudioRendition>) {
        self.renditions.push(rendition);
    }

    /// The rendition used for playback: the first one declared.
    pub fn default_rendition(&self) -> Option<&Arc<AudioRendition>> {
        self.renditions.first()
    }
}

/// Parsed master playlist.
#[derive(Debug)]
pub struct MasterPlaylist {
    pub url: String,
    /// Variants sorted ascending by bitrate; `variants[i].index == i`.
    pub variants: Vec<Arc<VariantLevel>>,
    pub audio_groups: HashMap<String, RenditionGroup>,
}

impl MasterPlaylist {
    pub fn variant(&self, index: usize) -> Option<&Arc<VariantLevel>> {
        self.variants.get(index)
    }

    pub fn default_variant(&self) -> Option<&Arc<VariantLevel>> {
        self.variants.first()
    }

    pub fn default_audio_rendition(&self, group_id: &str) -> Option<&Arc<AudioRendition>> {
        self.audio_groups.get(group_id)?.default_rendition()
    }

    /// Default audio rendition for the audio group a variant references.
    pub fn audio_rendition_for(&self, variant: &VariantLevel) -> Option<&Arc<AudioRendition>> {
        self.default_audio_rendition(variant.audio_group_id.as_deref()?)
    }
}
