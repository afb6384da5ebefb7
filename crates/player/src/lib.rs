//! Adaptive-bitrate HLS playback engine.
//!
//! A [`SessionCoordinator`] waits for a [`MediaHost`] and a parsed master playlist, then
//! runs one [`TrackController`] per track. Each controller downloads segments
//! sequentially into its [`BufferManager`] and reacts to quality switches; progress is
//! published on the [`EventBus`].

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod loader;
pub mod memory;
pub mod session;
pub mod sink;
pub mod stats;
pub mod track;

pub use buffer::{BufferManager, SegmentRef};
pub use config::{BufferConfig, FetcherConfig, PlayerConfig};
pub use error::PlayerError;
pub use events::{BufferMetrics, EventBus, PlayerEvent};
pub use fetcher::{FetchedPayload, HttpFetcher, MediaFetcher, StaticFetcher};
pub use loader::PlaylistLoader;
pub use memory::{MemorySink, SimulatedHost, SinkOperation};
pub use session::{PlaybackSession, SessionCoordinator};
pub use sink::{BufferSink, MediaChunk, MediaHost, TimeRange, TimeRanges};
pub use stats::{PlaybackStats, StatsSnapshot, describe_variant};
pub use track::{TrackContext, TrackController, TrackPhase};

pub use hls;
