mod cli;
mod config;
mod error;
mod schedule;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use player_engine::hls::MediaKind;
use player_engine::{
    HttpFetcher, MediaHost, PlaybackStats, PlayerEvent, SessionCoordinator, SimulatedHost,
    describe_variant,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::Args,
    config::AppConfig,
    error::{AppError, Result},
    schedule::{Shift, SwitchSchedule},
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    if args.tick_ms == 0 {
        return Err(AppError::InvalidInput("--tick-ms must be greater than zero".into()));
    }
    if !(args.speed.is_finite() && args.speed > 0.0) {
        return Err(AppError::InvalidInput("--speed must be a positive number".into()));
    }

    let app_config = AppConfig::load(args.config.as_deref())?;
    let mut player_config = app_config.into_player_config();
    if let Some(user_agent) = args.user_agent {
        player_config.fetcher.user_agent = user_agent;
    }
    let stats_window = player_config.stats_window;

    let fetcher = Arc::new(HttpFetcher::new(&player_config.fetcher)?);
    let host = Arc::new(SimulatedHost::new());
    let coordinator = SessionCoordinator::new(fetcher, player_config)?;
    let mut events = coordinator.subscribe();

    coordinator.media_attached(host.clone())?;
    let Some(session) = coordinator.load_master(&args.url).await? else {
        return Err(AppError::InvalidInput(format!(
            "playback did not start for {}",
            args.url
        )));
    };
    info!(url = %args.url, variants = session.master().variants.len(), "Playing stream");

    let mut stats = PlaybackStats::new(stats_window);
    let mut schedule = SwitchSchedule::new(&args.upgrade_at, &args.downgrade_at);
    let tick = Duration::from_millis(args.tick_ms);
    let step = tick.as_secs_f64() * args.speed;
    let mut ticker = tokio::time::interval(tick);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let outcome = loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted, stopping playback");
                break Ok(());
            }
            _ = ticker.tick() => {
                let position = host.advance(step);
                for shift in schedule.due(position) {
                    let accepted = match shift {
                        Shift::Up => session.shift_quality_level_up(),
                        Shift::Down => session.shift_quality_level_down(),
                    };
                    if !accepted {
                        warn!(?shift, position, "Quality level change not possible");
                    }
                }

                if host.has_ended() {
                    info!(position, "Playback finished");
                    break Ok(());
                }
                if args.play_for.is_some_and(|limit| position >= limit) {
                    info!(position, "Reached requested play time");
                    break Ok(());
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(e) = handle_event(&event, &mut stats) {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event consumer lagged behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    coordinator.shutdown().await;

    let summary = stats.snapshot();
    info!(
        position = host.current_position(),
        variant = %describe_variant(&session.active_variant()),
        latency_ms = summary.average_latency_ms.unwrap_or_default().round(),
        download_rate = %format!("{:.3} MB/s", summary.download_rate.unwrap_or_default()),
        playback_rate = %format!("{:.3} MB/s", summary.playback_rate.unwrap_or_default()),
        "Session summary"
    );
    outcome
}

fn handle_event(event: &PlayerEvent, stats: &mut PlaybackStats) -> Result<()> {
    stats.observe(event);

    match event {
        PlayerEvent::VariantLevelChange { variant } => {
            info!(variant = %describe_variant(variant), "Variant level change");
        }
        PlayerEvent::SegmentLoaded { segment } => {
            let snapshot = stats.snapshot();
            info!(
                start = segment.start,
                playlist = %segment.playlist_id,
                latency_ms = snapshot.average_latency_ms.unwrap_or_default().round(),
                download_rate = %format!("{:.3} MB/s", snapshot.download_rate.unwrap_or_default()),
                "Segment loaded"
            );
        }
        PlayerEvent::BufferMetricsUpdated(metrics) => {
            let snapshot = stats.snapshot();
            debug!(
                buffer = %format!("{:.1} seconds / {:.2} MB", snapshot.buffer_seconds, snapshot.buffer_megabytes),
                forward = metrics.forward,
                playback_rate = %format!("{:.3} MB/s", snapshot.playback_rate.unwrap_or_default()),
                "Buffer updated"
            );
        }
        PlayerEvent::TrackEnded { kind } => info!(%kind, "Track reached end of stream"),
        PlayerEvent::TrackStalled { kind, reason } => {
            error!(%kind, reason = %reason, "Track stalled");
            if *kind == MediaKind::Video {
                return Err(AppError::Stalled {
                    kind: *kind,
                    reason: reason.clone(),
                });
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
