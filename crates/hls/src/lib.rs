// HLS (HTTP Live Streaming) playlist model and parser
pub mod attributes;
pub mod error;
pub mod model;
pub mod parser;

// Export common types for ease of use
pub use attributes::{MapAttributes, RenditionAttributes, RenditionType, VariantAttributes};
pub use error::HlsError;
pub use media_types::Resolution;
pub use model::{
    AudioRendition, MapSegment, MasterPlaylist, MediaKind, MediaPlaylist, NetworkMetrics,
    RenditionGroup, Segment, VariantLevel, resolve_url,
};
pub use parser::{parse_master_playlist, parse_media_playlist};
