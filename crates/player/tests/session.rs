//! Integration tests for the playback engine.
//!
//! These tests drive a whole session against an in-memory fetcher and the simulated
//! host, and check what reached each buffer sink.

use std::sync::Arc;
use std::time::Duration;

use player_engine::{
    BufferSink, MediaHost, PlaybackSession, PlayerConfig, PlayerEvent, SessionCoordinator,
    SimulatedHost, SinkOperation, StaticFetcher, TimeRange, TrackController, TrackPhase,
    hls::MediaKind,
};
use tokio::sync::broadcast::Receiver;

const BASE: &str = "https://cdn.example.com/hls";
const MASTER_URL: &str = "https://cdn.example.com/hls/master.m3u8";
const SEGMENT_SIZE: usize = 1_000;

const MASTER: &str = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="English",LANGUAGE="en",DEFAULT=YES,URI="audio/index.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=1200000,AVERAGE-BANDWIDTH=1000000,RESOLUTION=1280x720,CODECS="avc1.4d401f,mp4a.40.2",AUDIO="aac"
v1/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=400000,AVERAGE-BANDWIDTH=350000,RESOLUTION=640x360,CODECS="avc1.4d401e,mp4a.40.2",AUDIO="aac"
v0/index.m3u8
"#;

const MEDIA: &str = r#"#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-MAP:URI="init.mp4"
#EXTINF:6.0,
seg0.mp4
#EXTINF:6.0,
seg1.mp4
#EXTINF:4.0,
seg2.mp4
#EXT-X-ENDLIST
"#;

/// Fetcher serving a two-variant stream with one audio rendition. Every media playlist
/// holds a map and three segments of 6, 6 and 4 seconds.
fn stream_fetcher() -> StaticFetcher {
    let fetcher = StaticFetcher::new().with_resource(MASTER_URL, MASTER);
    for dir in ["v0", "v1", "audio"] {
        fetcher.insert(format!("{BASE}/{dir}/index.m3u8"), MEDIA);
        fetcher.insert(format!("{BASE}/{dir}/init.mp4"), vec![0u8; 64]);
        for i in 0..3 {
            fetcher.insert(format!("{BASE}/{dir}/seg{i}.mp4"), vec![1u8; SEGMENT_SIZE]);
        }
    }
    fetcher
}

const TWO_GROUP_MASTER: &str = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="alo",NAME="Stereo",DEFAULT=YES,URI="alo/index.m3u8"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="ahi",NAME="Stereo",DEFAULT=YES,URI="ahi/index.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=640x360,CODECS="avc1.4d401e,mp4a.40.5",AUDIO="alo"
v0/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=1280x720,CODECS="avc1.4d401f,mp4a.40.2",AUDIO="ahi"
v1/index.m3u8
"#;

/// Like [`stream_fetcher`], but each variant has its own audio group. The high-quality
/// audio map is 96 bytes so its append can be told apart.
fn two_group_fetcher() -> StaticFetcher {
    let fetcher = StaticFetcher::new().with_resource(MASTER_URL, TWO_GROUP_MASTER);
    for (dir, map_size) in [("v0", 64), ("v1", 64), ("alo", 64), ("ahi", 96)] {
        fetcher.insert(format!("{BASE}/{dir}/index.m3u8"), MEDIA);
        fetcher.insert(format!("{BASE}/{dir}/init.mp4"), vec![0u8; map_size]);
        for i in 0..3 {
            fetcher.insert(format!("{BASE}/{dir}/seg{i}.mp4"), vec![1u8; SEGMENT_SIZE]);
        }
    }
    fetcher
}

async fn wait_for_phase(track: &TrackController, phase: TrackPhase) {
    for _ in 0..1_000 {
        if track.phase() == phase {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{} track never reached {phase:?}", track.kind());
}

async fn next_event<F>(rx: &mut Receiver<PlayerEvent>, mut pred: F) -> PlayerEvent
where
    F: FnMut(&PlayerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel error: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect events until both tracks have reported the end of their playlists.
async fn collect_until_ended(rx: &mut Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    let (mut video_ended, mut audio_ended) = (false, false);
    while !(video_ended && audio_ended) {
        let event = next_event(rx, |_| true).await;
        match &event {
            PlayerEvent::TrackEnded { kind: MediaKind::Video } => video_ended = true,
            PlayerEvent::TrackEnded { kind: MediaKind::Audio } => audio_ended = true,
            PlayerEvent::TrackStalled { kind, reason } => panic!("{kind} track stalled: {reason}"),
            _ => {}
        }
        events.push(event);
    }
    events
}

fn spans(host: &SimulatedHost, kind: MediaKind) -> Vec<Option<(f64, f64)>> {
    host.sink(kind)
        .unwrap()
        .history()
        .into_iter()
        .filter_map(|op| match op {
            SinkOperation::Append { span, .. } => Some(span.map(|r| (r.start, r.end))),
            SinkOperation::Remove { .. } => None,
        })
        .collect()
}

async fn start_session(
    fetcher: Arc<StaticFetcher>,
    host: Arc<SimulatedHost>,
) -> (SessionCoordinator, Arc<PlaybackSession>, Receiver<PlayerEvent>) {
    let coordinator = SessionCoordinator::new(fetcher, PlayerConfig::default()).unwrap();
    let rx = coordinator.subscribe();

    assert!(coordinator.media_attached(host).unwrap().is_none());
    let session = coordinator
        .load_master(MASTER_URL)
        .await
        .unwrap()
        .expect("session should start once both dependencies are present");
    (coordinator, session, rx)
}

mod playback_tests {
    use super::*;

    #[tokio::test]
    async fn test_plays_to_end_of_stream() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher.clone(), host.clone()).await;

        let events = collect_until_ended(&mut rx).await;

        match &events[0] {
            PlayerEvent::VariantLevelChange { variant } => {
                assert_eq!(variant.index, 0);
                assert_eq!(variant.id, "[0]640x360");
            }
            other => panic!("expected the starting variant first, got {other:?}"),
        }

        let expected = vec![None, Some((0.0, 6.0)), Some((6.0, 12.0)), Some((12.0, 16.0))];
        assert_eq!(spans(&host, MediaKind::Video), expected);
        assert_eq!(spans(&host, MediaKind::Audio), expected);

        let video_sink = host.sink(MediaKind::Video).unwrap();
        assert_eq!(video_sink.mime(), "video/mp4; codecs=\"avc1.4d401e\"");
        assert_eq!(
            host.sink(MediaKind::Audio).unwrap().mime(),
            "audio/mp4; codecs=\"mp4a.40.2\""
        );
        assert_eq!(video_sink.buffered().first(), Some(TimeRange::new(0.0, 16.0)));

        assert_eq!(host.duration(), Some(16.0));
        assert!(host.is_end_of_stream());
        assert!(session.is_ended());
        assert_eq!(session.video().phase(), TrackPhase::Ended);

        // The higher variant was never needed.
        assert_eq!(fetcher.request_count(&format!("{BASE}/v1/index.m3u8")), 0);
        assert_eq!(fetcher.request_count(&format!("{BASE}/v0/index.m3u8")), 1);

        coordinator.shutdown().await;
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn test_video_events_carry_segment_and_buffer_metrics() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, _session, mut rx) = start_session(fetcher, host).await;

        let events = collect_until_ended(&mut rx).await;

        let loaded: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::SegmentLoaded { segment } => Some(segment.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(loaded.len(), 3);
        for segment in &loaded {
            assert_eq!(segment.kind, MediaKind::Video);
            assert_eq!(segment.byte_length(), Some(SEGMENT_SIZE as u64));
        }

        let metrics: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::BufferMetricsUpdated(m) => Some(*m),
                _ => None,
            })
            .collect();
        // One per video append, map included.
        assert_eq!(metrics.len(), 4);
        let last = metrics.last().unwrap();
        assert_eq!(last.end, 16.0);
        assert_eq!(last.seconds, 16.0);
        assert_eq!(last.forward, 16.0);
        assert_eq!(last.segments, 3);
        assert_eq!(last.bytes, (3 * SEGMENT_SIZE) as f64);

        coordinator.shutdown().await;
    }
}

mod coordinator_tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_once_in_either_order() {
        let fetcher = Arc::new(stream_fetcher());
        let coordinator = SessionCoordinator::new(fetcher, PlayerConfig::default()).unwrap();

        // Master first, host second.
        assert!(coordinator.load_master(MASTER_URL).await.unwrap().is_none());
        assert!(coordinator.session().is_none());

        let host = Arc::new(SimulatedHost::new());
        let session = coordinator.media_attached(host.clone()).unwrap().unwrap();

        // Repeated calls return the running session and create nothing new.
        let other_host = Arc::new(SimulatedHost::new());
        let again = coordinator.media_attached(other_host.clone()).unwrap().unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        let again = coordinator.load_master(MASTER_URL).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&session, &again));

        assert!(other_host.sink(MediaKind::Video).is_none());
        assert!(host.sink(MediaKind::Video).is_some());
        assert!(host.sink(MediaKind::Audio).is_some());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_master_without_audio_plays_video_only() {
        let master = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=400000,CODECS=\"avc1.4d401e\"\n\
v0/index.m3u8\n";
        let fetcher = Arc::new(stream_fetcher().with_resource(MASTER_URL, master));
        let host = Arc::new(SimulatedHost::new());
        let coordinator = SessionCoordinator::new(fetcher, PlayerConfig::default()).unwrap();
        let mut rx = coordinator.subscribe();

        coordinator.media_attached(host.clone()).unwrap();
        let session = coordinator.load_master(MASTER_URL).await.unwrap().unwrap();
        assert!(session.audio().is_none());

        next_event(&mut rx, |e| {
            matches!(e, PlayerEvent::TrackEnded { kind: MediaKind::Video })
        })
        .await;
        assert!(host.sink(MediaKind::Audio).is_none());
        assert!(session.is_ended());

        coordinator.shutdown().await;
    }
}

mod quality_switch_tests {
    use super::*;

    #[tokio::test]
    async fn test_switch_up_after_end_flushes_then_refills() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher, host.clone()).await;
        collect_until_ended(&mut rx).await;

        assert!(session.shift_quality_level_up());
        match next_event(&mut rx, |e| matches!(e, PlayerEvent::VariantLevelChange { .. })).await {
            PlayerEvent::VariantLevelChange { variant } => assert_eq!(variant.index, 1),
            _ => unreachable!(),
        }
        let events = collect_until_ended(&mut rx).await;

        let video = host.sink(MediaKind::Video).unwrap().history();
        assert_eq!(
            &video[4..],
            &[
                SinkOperation::Remove {
                    start: 9.0,
                    end: f64::INFINITY
                },
                SinkOperation::Append {
                    span: None,
                    bytes: 64
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(6.0, 12.0)),
                    bytes: SEGMENT_SIZE
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(12.0, 16.0)),
                    bytes: SEGMENT_SIZE
                },
            ]
        );

        // Audio keeps its rendition and map, but re-downloads what was flushed.
        let audio = host.sink(MediaKind::Audio).unwrap().history();
        assert_eq!(
            &audio[4..],
            &[
                SinkOperation::Remove {
                    start: 9.0,
                    end: f64::INFINITY
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(6.0, 12.0)),
                    bytes: SEGMENT_SIZE
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(12.0, 16.0)),
                    bytes: SEGMENT_SIZE
                },
            ]
        );

        for event in &events {
            if let PlayerEvent::SegmentLoaded { segment } = event {
                assert_eq!(&*segment.playlist_id, "[1]1280x720");
            }
        }

        assert_eq!(session.active_variant().index, 1);
        assert!(session.video().buffer().current_map().is_some_and(|m| m.url.ends_with("v1/init.mp4")));
        // Already at the top.
        assert!(!session.shift_quality_level_up());

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_during_download_applies_after_segment() {
        let fetcher = Arc::new(two_group_fetcher().with_latency(Duration::from_millis(500)));
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher.clone(), host.clone()).await;

        next_event(&mut rx, |e| {
            matches!(e, PlayerEvent::BufferMetricsUpdated(m) if m.end == 6.0)
        })
        .await;
        // The second video segment is now downloading.
        wait_for_phase(session.video(), TrackPhase::LoadingSegment).await;
        assert!(session.shift_quality_level_up());
        assert_eq!(session.video().pending_variant(), Some(1));

        let events = collect_until_ended(&mut rx).await;

        let video = host.sink(MediaKind::Video).unwrap().history();
        assert_eq!(
            &video[2..],
            &[
                SinkOperation::Remove {
                    start: 9.0,
                    end: f64::INFINITY
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(6.0, 12.0)),
                    bytes: SEGMENT_SIZE
                },
                SinkOperation::Append {
                    span: None,
                    bytes: 64
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(12.0, 16.0)),
                    bytes: SEGMENT_SIZE
                },
            ]
        );

        // The in-flight segment still belongs to the old variant.
        let loaded: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::SegmentLoaded { segment } => {
                    Some((segment.start, segment.playlist_id.to_string()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            loaded,
            vec![
                (6.0, "[0]640x360".to_string()),
                (12.0, "[1]1280x720".to_string())
            ]
        );

        // Audio moved to the rendition of the new variant's group.
        let audio = session.audio().unwrap();
        assert!(
            audio
                .buffer()
                .current_map()
                .is_some_and(|m| m.url.ends_with("ahi/init.mp4"))
        );
        assert_eq!(fetcher.request_count(&format!("{BASE}/ahi/index.m3u8")), 1);
        assert_eq!(fetcher.request_count(&format!("{BASE}/ahi/init.mp4")), 1);
        assert_eq!(fetcher.request_count(&format!("{BASE}/alo/init.mp4")), 1);
        let audio_sink = host.sink(MediaKind::Audio).unwrap();
        assert!(audio_sink.history().contains(&SinkOperation::Append {
            span: None,
            bytes: 96
        }));
        assert_eq!(audio_sink.buffered().first(), Some(TimeRange::new(0.0, 16.0)));

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_flush_waits_for_append_in_flight() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new().with_append_delay(Duration::from_secs(1)));
        let (coordinator, session, mut rx) = start_session(fetcher, host.clone()).await;

        next_event(&mut rx, |e| {
            matches!(e, PlayerEvent::BufferMetricsUpdated(m) if m.end == 6.0)
        })
        .await;
        wait_for_phase(session.video(), TrackPhase::Appending).await;
        assert!(session.video().buffer().is_busy());
        assert!(session.shift_quality_level_up());

        collect_until_ended(&mut rx).await;

        // [6, 12) completes before the flush trims it back to the margin.
        let video_sink = host.sink(MediaKind::Video).unwrap();
        assert_eq!(
            &video_sink.history()[2..],
            &[
                SinkOperation::Append {
                    span: Some(TimeRange::new(6.0, 12.0)),
                    bytes: SEGMENT_SIZE
                },
                SinkOperation::Remove {
                    start: 9.0,
                    end: f64::INFINITY
                },
                SinkOperation::Append {
                    span: None,
                    bytes: 64
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(6.0, 12.0)),
                    bytes: SEGMENT_SIZE
                },
                SinkOperation::Append {
                    span: Some(TimeRange::new(12.0, 16.0)),
                    bytes: SEGMENT_SIZE
                },
            ]
        );
        assert_eq!(video_sink.buffered().first(), Some(TimeRange::new(0.0, 16.0)));
        assert_eq!(session.active_variant().index, 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_switch_down_at_lowest_level_is_rejected() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher, host).await;
        collect_until_ended(&mut rx).await;

        assert!(!session.shift_quality_level_down());
        assert_eq!(session.video().pending_variant(), None);
        assert_eq!(session.active_variant().index, 0);
        assert!(session.video().is_ended());

        // Audio never switches on its own.
        assert!(!session.audio().unwrap().shift_quality_level_up());

        coordinator.shutdown().await;
    }
}

mod eviction_tests {
    use super::*;

    fn removals(host: &SimulatedHost, kind: MediaKind) -> Vec<SinkOperation> {
        host.sink(kind)
            .unwrap()
            .history()
            .into_iter()
            .filter(|op| matches!(op, SinkOperation::Remove { .. }))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_buffer_evicted_on_timer_until_playback_ends() {
        let fetcher = Arc::new(stream_fetcher());
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, _session, mut rx) = start_session(fetcher, host.clone()).await;
        collect_until_ended(&mut rx).await;
        host.set_position(14.0);

        // Nothing is evicted before the initial delay.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(removals(&host, MediaKind::Video).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let expected = vec![SinkOperation::Remove {
            start: 0.0,
            end: 5.0,
        }];
        assert_eq!(removals(&host, MediaKind::Video), expected);
        assert_eq!(removals(&host, MediaKind::Audio), expected);

        match next_event(&mut rx, |e| {
            matches!(e, PlayerEvent::BufferMetricsUpdated(m) if m.start == 5.0)
        })
        .await
        {
            PlayerEvent::BufferMetricsUpdated(m) => {
                assert_eq!(m.end, 16.0);
                assert_eq!(m.backward, 9.0);
                // The first segment still overlaps [5, 6).
                assert_eq!(m.segments, 3);
            }
            _ => unreachable!(),
        }

        // Next tick finds nothing older than the margin.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(removals(&host, MediaKind::Video), expected);

        // Once playback has ended the timer stops, even though [5, 7) is now evictable.
        host.set_position(16.0);
        assert!(host.has_ended());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(removals(&host, MediaKind::Video), expected);
        assert_eq!(removals(&host, MediaKind::Audio), expected);

        coordinator.shutdown().await;
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_playlist_failure_stalls_track() {
        let fetcher = Arc::new(stream_fetcher());
        fetcher.fail(format!("{BASE}/v0/index.m3u8"));
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher, host.clone()).await;

        match next_event(&mut rx, |e| matches!(e, PlayerEvent::TrackStalled { .. })).await {
            PlayerEvent::TrackStalled { kind, reason } => {
                assert_eq!(kind, MediaKind::Video);
                assert!(reason.contains("v0/index.m3u8"), "{reason}");
            }
            _ => unreachable!(),
        }
        assert_eq!(session.video().phase(), TrackPhase::Stalled);
        assert!(host.sink(MediaKind::Video).unwrap().history().is_empty());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_segment_stalls_after_buffered_data() {
        let fetcher = Arc::new(stream_fetcher());
        fetcher.fail(format!("{BASE}/v0/seg1.mp4"));
        let host = Arc::new(SimulatedHost::new());
        let (coordinator, session, mut rx) = start_session(fetcher, host.clone()).await;

        match next_event(&mut rx, |e| {
            matches!(e, PlayerEvent::TrackStalled { kind: MediaKind::Video, .. })
        })
        .await
        {
            PlayerEvent::TrackStalled { reason, .. } => assert!(reason.contains("seg1.mp4")),
            _ => unreachable!(),
        }

        assert_eq!(spans(&host, MediaKind::Video), vec![None, Some((0.0, 6.0))]);
        assert_eq!(session.video().phase(), TrackPhase::Stalled);
        assert!(!session.is_ended());

        coordinator.shutdown().await;
    }
}
