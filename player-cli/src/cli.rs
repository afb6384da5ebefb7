use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "hlsplay",
    version,
    about = "Play an HLS stream against a simulated media element",
    long_about = "Downloads the variants and audio rendition of an HLS master playlist into an \
                  in-memory buffer, advancing a simulated play clock and logging download and \
                  buffer statistics. Quality switches can be scheduled at play positions."
)]
pub struct Args {
    /// Master playlist URL
    pub url: String,

    /// Stop after this many seconds of simulated playback (default: until the stream ends)
    #[arg(long, value_name = "SECONDS")]
    pub play_for: Option<f64>,

    /// Switch one quality level up when the play position reaches SECONDS (repeatable)
    #[arg(long = "upgrade-at", value_name = "SECONDS")]
    pub upgrade_at: Vec<f64>,

    /// Switch one quality level down when the play position reaches SECONDS (repeatable)
    #[arg(long = "downgrade-at", value_name = "SECONDS")]
    pub downgrade_at: Vec<f64>,

    /// Interval between clock ticks, in milliseconds
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,

    /// Playback speed multiplier applied to the simulated clock
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the HTTP user agent
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
