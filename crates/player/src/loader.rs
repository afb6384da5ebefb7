use std::sync::Arc;

use hls::{MasterPlaylist, MediaPlaylist, parse_master_playlist, parse_media_playlist};
use tracing::{debug, info};

use crate::error::PlayerError;
use crate::fetcher::MediaFetcher;

/// Fetches and parses playlists.
#[derive(Clone)]
pub struct PlaylistLoader {
    fetcher: Arc<dyn MediaFetcher>,
}

impl PlaylistLoader {
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn load_master_playlist(&self, url: &str) -> Result<Arc<MasterPlaylist>, PlayerError> {
        let text = self.fetcher.fetch_text(url).await?;
        let master = parse_master_playlist(url, &text)?;
        info!(
            url,
            variants = master.variants.len(),
            audio_groups = master.audio_groups.len(),
            "Loaded master playlist"
        );
        Ok(Arc::new(master))
    }

    /// Populate a media playlist. A playlist that is already loaded is not fetched again.
    pub async fn load_media_playlist(&self, playlist: &MediaPlaylist) -> Result<(), PlayerError> {
        if playlist.is_loaded() {
            return Ok(());
        }

        let text = self.fetcher.fetch_text(&playlist.url).await?;
        if parse_media_playlist(playlist, &text) {
            debug!(
                id = %playlist.id,
                kind = %playlist.kind,
                segments = playlist.segments().len(),
                duration = playlist.duration().unwrap_or_default(),
                "Loaded media playlist"
            );
        }
        Ok(())
    }
}
