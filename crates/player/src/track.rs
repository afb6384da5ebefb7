// Track Controller: per-track segment lifecycle loop and quality-switch protocol.

use std::sync::Arc;

use hls::{AudioRendition, MasterPlaylist, MediaKind, MediaPlaylist, NetworkMetrics, VariantLevel};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferManager, SegmentRef};
use crate::config::PlayerConfig;
use crate::error::PlayerError;
use crate::events::{EventBus, PlayerEvent};
use crate::fetcher::MediaFetcher;
use crate::loader::PlaylistLoader;
use crate::sink::MediaHost;

/// Where a track is in its segment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    Idle,
    LoadingPlaylist,
    SelectingSegment,
    LoadingSegment,
    Appending,
    /// No segment left at the current buffered position; waiting to be resumed.
    Ended,
    /// Stopped after an unrecoverable error.
    Stalled,
}

/// Shared services every track needs.
pub struct TrackContext {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub loader: PlaylistLoader,
    pub host: Arc<dyn MediaHost>,
    pub events: EventBus,
    pub config: PlayerConfig,
    pub token: CancellationToken,
}

impl TrackContext {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        host: Arc<dyn MediaHost>,
        events: EventBus,
        config: PlayerConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            loader: PlaylistLoader::new(fetcher.clone()),
            fetcher,
            host,
            events,
            config,
            token,
        }
    }
}

struct TrackState {
    phase: TrackPhase,
    active_variant: Arc<VariantLevel>,
    /// Rank to switch to at the top of the next loop iteration.
    pending_variant: Option<usize>,
    ended: bool,
    duration_set: bool,
    /// Flushes issued for a switch; awaited before the switch is applied.
    flushes: Vec<JoinHandle<()>>,
}

/// The playlist a track is currently reading from.
enum ActivePlaylist {
    Variant(Arc<VariantLevel>),
    Rendition(Arc<AudioRendition>),
}

impl ActivePlaylist {
    fn playlist(&self) -> &MediaPlaylist {
        match self {
            ActivePlaylist::Variant(variant) => &variant.playlist,
            ActivePlaylist::Rendition(rendition) => &rendition.playlist,
        }
    }
}

pub struct TrackController {
    kind: MediaKind,
    master: Arc<MasterPlaylist>,
    buffer: Arc<BufferManager>,
    ctx: Arc<TrackContext>,
    state: Mutex<TrackState>,
    resume: Notify,
    variant_events: Mutex<Option<broadcast::Receiver<PlayerEvent>>>,
}

impl TrackController {
    /// Create a controller bound to the lowest-ranked variant.
    ///
    /// An audio controller subscribes to variant changes here, so it observes every
    /// change published after construction.
    pub fn new(
        kind: MediaKind,
        master: Arc<MasterPlaylist>,
        buffer: Arc<BufferManager>,
        ctx: Arc<TrackContext>,
    ) -> Result<Arc<Self>, PlayerError> {
        let active_variant = master
            .default_variant()
            .cloned()
            .ok_or_else(|| PlayerError::configuration("master playlist has no variants"))?;

        let variant_events = match kind {
            MediaKind::Audio => Some(ctx.events.subscribe()),
            MediaKind::Video => None,
        };

        Ok(Arc::new(Self {
            kind,
            master,
            buffer,
            ctx,
            state: Mutex::new(TrackState {
                phase: TrackPhase::Idle,
                active_variant,
                pending_variant: None,
                ended: false,
                duration_set: false,
                flushes: Vec::new(),
            }),
            resume: Notify::new(),
            variant_events: Mutex::new(variant_events),
        }))
    }

    /// Spawn the lifecycle loop and the back-buffer eviction timer.
    ///
    /// The video track announces its starting variant before its loop begins; the
    /// audio track starts following variant changes.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(3);

        match self.kind {
            MediaKind::Video => {
                let variant = self.active_variant();
                info!(variant = %variant.id, "Starting video track");
                self.ctx
                    .events
                    .publish(PlayerEvent::VariantLevelChange { variant });
            }
            MediaKind::Audio => {
                if let Some(rx) = self.variant_events.lock().take() {
                    handles.push(tokio::spawn(self.clone().run_variant_listener(rx)));
                }
                info!(variant = %self.active_variant().id, "Starting audio track");
            }
        }

        handles.push(tokio::spawn(self.clone().run()));
        handles.push(tokio::spawn(self.clone().run_flush_behind()));
        handles
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn phase(&self) -> TrackPhase {
        self.state.lock().phase
    }

    pub fn active_variant(&self) -> Arc<VariantLevel> {
        self.state.lock().active_variant.clone()
    }

    pub fn pending_variant(&self) -> Option<usize> {
        self.state.lock().pending_variant
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn buffer(&self) -> &Arc<BufferManager> {
        &self.buffer
    }

    /// Request the next higher quality level. Returns `false` if already at the top.
    pub fn shift_quality_level_up(self: &Arc<Self>) -> bool {
        let target = self.active_variant().index + 1;
        self.shift_quality_level(target)
    }

    /// Request the next lower quality level. Returns `false` if already at the bottom.
    pub fn shift_quality_level_down(self: &Arc<Self>) -> bool {
        match self.active_variant().index.checked_sub(1) {
            Some(target) => self.shift_quality_level(target),
            None => false,
        }
    }

    fn shift_quality_level(self: &Arc<Self>, target: usize) -> bool {
        if self.kind != MediaKind::Video {
            debug!(kind = %self.kind, "Quality switching is driven by the video track");
            return false;
        }
        let Some(variant) = self.master.variant(target).cloned() else {
            return false;
        };

        self.state.lock().pending_variant = Some(target);
        info!(variant = %variant.id, "Quality level change requested");

        self.schedule_flush_ahead();
        self.ctx
            .events
            .publish(PlayerEvent::VariantLevelChange { variant });
        true
    }

    fn schedule_flush_ahead(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = this.buffer.flush_ahead().await {
                warn!(kind = %this.kind, error = %e, "Forward flush failed");
            }
            this.resume_if_ended();
        });
        self.state.lock().flushes.push(handle);
    }

    fn resume_if_ended(&self) {
        let mut state = self.state.lock();
        if state.ended {
            state.ended = false;
            debug!(kind = %self.kind, "Resuming ended track");
            self.resume.notify_one();
        }
    }

    fn set_phase(&self, phase: TrackPhase) {
        self.state.lock().phase = phase;
    }

    /// Wait for outstanding switch flushes, then adopt the pending variant.
    async fn apply_pending_variant(&self) {
        let flushes = std::mem::take(&mut self.state.lock().flushes);
        for flush in flushes {
            if let Err(e) = flush.await {
                warn!(kind = %self.kind, error = %e, "Forward flush task failed");
            }
        }

        let mut state = self.state.lock();
        let Some(index) = state.pending_variant.take() else {
            return;
        };
        if let Some(variant) = self.master.variant(index) {
            if state.active_variant.index != variant.index {
                info!(kind = %self.kind, from = %state.active_variant.id, to = %variant.id, "Changing variant");
            }
            state.active_variant = variant.clone();
        }
    }

    fn current_playlist(&self) -> Result<ActivePlaylist, PlayerError> {
        let variant = self.active_variant();
        match self.kind {
            MediaKind::Video => Ok(ActivePlaylist::Variant(variant)),
            MediaKind::Audio => self
                .master
                .audio_rendition_for(&variant)
                .cloned()
                .map(ActivePlaylist::Rendition)
                .ok_or_else(|| PlayerError::MissingRendition {
                    group: variant.audio_group_id.clone(),
                }),
        }
    }

    /// The map when the sink holds a different one, otherwise the segment just past
    /// the buffered range.
    fn select_next_segment(&self, playlist: &MediaPlaylist) -> Option<SegmentRef> {
        if let Some(map) = playlist.map()
            && !self.buffer.current_map_is(map)
        {
            return Some(SegmentRef::Map(map.clone()));
        }

        let position = self.buffer.buffered_range_end() + self.ctx.config.segment_tolerance;
        trace!(kind = %self.kind, position, "Selecting next segment");
        playlist
            .segment_for_position(position)
            .map(SegmentRef::Content)
    }

    fn mark_ended(&self) {
        {
            let mut state = self.state.lock();
            state.ended = true;
            state.phase = TrackPhase::Ended;
        }
        info!(kind = %self.kind, "No more segments to load; reached end of stream");
        if self.kind == MediaKind::Video {
            self.ctx.host.end_of_stream();
        }
        self.ctx
            .events
            .publish(PlayerEvent::TrackEnded { kind: self.kind });
    }

    fn stall(&self, err: PlayerError) {
        error!(kind = %self.kind, error = %err, "Track stalled");
        self.set_phase(TrackPhase::Stalled);
        self.ctx.events.publish(PlayerEvent::TrackStalled {
            kind: self.kind,
            reason: err.to_string(),
        });
    }

    async fn run(self: Arc<Self>) {
        let token = self.ctx.token.clone();

        loop {
            if token.is_cancelled() {
                break;
            }
            self.apply_pending_variant().await;

            let active = match self.current_playlist() {
                Ok(active) => active,
                Err(e) => {
                    self.stall(e);
                    return;
                }
            };
            let playlist = active.playlist();

            if !playlist.is_loaded() {
                self.set_phase(TrackPhase::LoadingPlaylist);
            }
            match token
                .run_until_cancelled(self.ctx.loader.load_media_playlist(playlist))
                .await
            {
                None => break,
                Some(Err(e)) => {
                    self.stall(e);
                    return;
                }
                Some(Ok(())) => {}
            }

            if self.kind == MediaKind::Video {
                let mut state = self.state.lock();
                if !state.duration_set {
                    state.duration_set = true;
                    let duration = playlist.duration().unwrap_or_default();
                    debug!(duration, "Setting stream duration");
                    self.ctx.host.set_duration(duration);
                }
            }

            self.set_phase(TrackPhase::SelectingSegment);
            let segment = match self.select_next_segment(playlist) {
                Some(segment) => segment,
                None => {
                    self.mark_ended();
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = self.resume.notified() => {}
                    }
                    continue;
                }
            };

            self.set_phase(TrackPhase::LoadingSegment);
            let payload = match token
                .run_until_cancelled(self.ctx.fetcher.fetch_binary(segment.url()))
                .await
            {
                None => break,
                Some(Err(e)) => {
                    self.stall(e);
                    return;
                }
                Some(Ok(payload)) => payload,
            };

            if let SegmentRef::Content(content) = &segment {
                content.record_metrics(NetworkMetrics {
                    byte_length: payload.data.len() as u64,
                    latency: payload.latency,
                });
                if self.kind == MediaKind::Video {
                    self.ctx.events.publish(PlayerEvent::SegmentLoaded {
                        segment: content.clone(),
                    });
                }
            }

            self.set_phase(TrackPhase::Appending);
            match token
                .run_until_cancelled(self.buffer.append_segment(&segment, payload.data))
                .await
            {
                None => break,
                Some(Err(e)) => {
                    self.stall(e);
                    return;
                }
                Some(Ok(())) => {}
            }
        }

        debug!(kind = %self.kind, "Track loop cancelled");
    }

    async fn run_variant_listener(self: Arc<Self>, mut rx: broadcast::Receiver<PlayerEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.ctx.token.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Ok(PlayerEvent::VariantLevelChange { variant }) => self.follow_variant(variant),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(kind = %self.kind, skipped, "Variant listener lagged behind, events dropped");
                }
                Err(RecvError::Closed) => {
                    debug!(kind = %self.kind, "Event channel closed");
                    break;
                }
            }
        }
    }

    fn follow_variant(self: &Arc<Self>, variant: Arc<VariantLevel>) {
        {
            let mut state = self.state.lock();
            if state.pending_variant.is_none() && state.active_variant.index == variant.index {
                trace!(kind = %self.kind, variant = %variant.id, "Already on variant");
                return;
            }
            state.pending_variant = Some(variant.index);
        }
        debug!(kind = %self.kind, variant = %variant.id, "Following variant change");
        self.schedule_flush_ahead();
    }

    async fn run_flush_behind(self: Arc<Self>) {
        let token = self.ctx.token.clone();
        let config = &self.ctx.config.buffer;

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(config.flush_behind_delay) => {}
        }

        let mut ticker = tokio::time::interval(config.flush_behind_interval);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.ctx.host.has_ended() {
                debug!(kind = %self.kind, "Playback ended, stopping back-buffer eviction");
                break;
            }
            if let Err(e) = self.buffer.flush_behind().await {
                warn!(kind = %self.kind, error = %e, "Back-buffer flush failed");
            }
        }
    }
}

impl std::fmt::Debug for TrackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TrackController")
            .field("kind", &self.kind)
            .field("phase", &state.phase)
            .field("active_variant", &state.active_variant.id)
            .field("pending_variant", &state.pending_variant)
            .finish()
    }
}
