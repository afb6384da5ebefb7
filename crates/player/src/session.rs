// Session Coordinator: waits for both the media host and the master playlist, then
// wires sinks, buffer managers and track controllers together exactly once.

use std::sync::Arc;

use futures::future::join_all;
use hls::{MasterPlaylist, MediaKind, VariantLevel};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::BufferManager;
use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::events::{EventBus, PlayerEvent};
use crate::fetcher::MediaFetcher;
use crate::loader::PlaylistLoader;
use crate::sink::{MediaHost, sink_mime};
use crate::track::{TrackContext, TrackController};

#[derive(Default)]
struct PendingSession {
    host: Option<Arc<dyn MediaHost>>,
    master: Option<Arc<MasterPlaylist>>,
    session: Option<Arc<PlaybackSession>>,
}

pub struct SessionCoordinator {
    fetcher: Arc<dyn MediaFetcher>,
    events: EventBus,
    config: PlayerConfig,
    token: CancellationToken,
    pending: Mutex<PendingSession>,
}

impl SessionCoordinator {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, config: PlayerConfig) -> Result<Self, PlayerError> {
        let events = EventBus::with_capacity(config.event_channel_capacity);
        Self::with_events(fetcher, config, events)
    }

    /// Build a coordinator publishing to an existing bus.
    pub fn with_events(
        fetcher: Arc<dyn MediaFetcher>,
        config: PlayerConfig,
        events: EventBus,
    ) -> Result<Self, PlayerError> {
        config.validate()?;
        Ok(Self {
            fetcher,
            events,
            config,
            token: CancellationToken::new(),
            pending: Mutex::new(PendingSession::default()),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// The running session, once both dependencies have arrived.
    pub fn session(&self) -> Option<Arc<PlaybackSession>> {
        self.pending.lock().session.clone()
    }

    /// Provide the media host. Starts playback if the master playlist is already known.
    pub fn media_attached(
        &self,
        host: Arc<dyn MediaHost>,
    ) -> Result<Option<Arc<PlaybackSession>>, PlayerError> {
        let mut pending = self.pending.lock();
        if let Some(session) = &pending.session {
            debug!("Session already started, ignoring media host");
            return Ok(Some(session.clone()));
        }
        pending.host = Some(host);
        self.maybe_start(&mut pending)
    }

    /// Provide the parsed master playlist. Starts playback if the host is already attached.
    pub fn master_loaded(
        &self,
        master: Arc<MasterPlaylist>,
    ) -> Result<Option<Arc<PlaybackSession>>, PlayerError> {
        let mut pending = self.pending.lock();
        if let Some(session) = &pending.session {
            debug!("Session already started, ignoring master playlist");
            return Ok(Some(session.clone()));
        }
        pending.master = Some(master);
        self.maybe_start(&mut pending)
    }

    /// Fetch and parse the master playlist at `url`, then hand it to [`Self::master_loaded`].
    pub async fn load_master(&self, url: &str) -> Result<Option<Arc<PlaybackSession>>, PlayerError> {
        let master = PlaylistLoader::new(self.fetcher.clone())
            .load_master_playlist(url)
            .await?;
        self.master_loaded(master)
    }

    /// Cancel every task of the session and wait for them to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let session = self.session();
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    fn maybe_start(
        &self,
        pending: &mut PendingSession,
    ) -> Result<Option<Arc<PlaybackSession>>, PlayerError> {
        let (Some(host), Some(master)) = (pending.host.clone(), pending.master.clone()) else {
            return Ok(None);
        };

        let session = Arc::new(self.start_session(host, master)?);
        pending.session = Some(session.clone());
        Ok(Some(session))
    }

    fn start_session(
        &self,
        host: Arc<dyn MediaHost>,
        master: Arc<MasterPlaylist>,
    ) -> Result<PlaybackSession, PlayerError> {
        let default_variant = master
            .default_variant()
            .cloned()
            .ok_or_else(|| PlayerError::configuration("master playlist has no variants"))?;
        let has_audio = master.audio_rendition_for(&default_variant).is_some();

        let video_sink = host.add_sink(
            MediaKind::Video,
            &sink_mime(MediaKind::Video, default_variant.video_codec()),
        )?;
        let audio_sink = if has_audio {
            Some(host.add_sink(
                MediaKind::Audio,
                &sink_mime(MediaKind::Audio, default_variant.audio_codec()),
            )?)
        } else {
            warn!(variant = %default_variant.id, "No audio rendition for the default variant, playing video only");
            None
        };

        let token = self.token.child_token();
        let flush_margin = self.config.buffer.flush_margin.as_secs_f64();
        let ctx = Arc::new(TrackContext::new(
            self.fetcher.clone(),
            host.clone(),
            self.events.clone(),
            self.config.clone(),
            token.clone(),
        ));

        // Audio subscribes on construction, so it must exist before video announces
        // its starting variant.
        let audio = match audio_sink {
            Some(sink) => {
                let buffer = Arc::new(BufferManager::new(
                    MediaKind::Audio,
                    sink,
                    host.clone(),
                    flush_margin,
                ));
                Some(TrackController::new(
                    MediaKind::Audio,
                    master.clone(),
                    buffer,
                    ctx.clone(),
                )?)
            }
            None => None,
        };

        let video_buffer = Arc::new(
            BufferManager::new(MediaKind::Video, video_sink, host, flush_margin)
                .with_metrics_events(self.events.clone()),
        );
        let video = TrackController::new(MediaKind::Video, master.clone(), video_buffer, ctx)?;

        let mut handles = video.start();
        if let Some(audio) = &audio {
            handles.extend(audio.start());
        }

        info!(
            url = %master.url,
            variants = master.variants.len(),
            audio = audio.is_some(),
            "Playback session started"
        );

        Ok(PlaybackSession {
            master,
            video,
            audio,
            token,
            handles: Mutex::new(handles),
        })
    }
}

/// Handle to a running playback session.
pub struct PlaybackSession {
    master: Arc<MasterPlaylist>,
    video: Arc<TrackController>,
    audio: Option<Arc<TrackController>>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PlaybackSession {
    pub fn master(&self) -> &Arc<MasterPlaylist> {
        &self.master
    }

    pub fn video(&self) -> &Arc<TrackController> {
        &self.video
    }

    pub fn audio(&self) -> Option<&Arc<TrackController>> {
        self.audio.as_ref()
    }

    pub fn active_variant(&self) -> Arc<VariantLevel> {
        self.video.active_variant()
    }

    pub fn shift_quality_level_up(&self) -> bool {
        self.video.shift_quality_level_up()
    }

    pub fn shift_quality_level_down(&self) -> bool {
        self.video.shift_quality_level_down()
    }

    /// Whether every track has run out of segments.
    pub fn is_ended(&self) -> bool {
        self.video.is_ended() && self.audio.as_ref().is_none_or(|a| a.is_ended())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn shutdown(&self) {
        self.token.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Session task did not finish cleanly");
            }
        }
        debug!("Playback session shut down");
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("master", &self.master.url)
            .field("video", &self.video)
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}
