use player_engine::PlayerError;
use player_engine::hls::MediaKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Invalid configuration file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} track stalled: {reason}")]
    Stalled { kind: MediaKind, reason: String },
}

pub type Result<T> = std::result::Result<T, AppError>;
