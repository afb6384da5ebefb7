use hls::{HlsError, MediaKind};
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("playlist error: {source}")]
    Playlist {
        #[from]
        source: HlsError,
    },

    #[error("no audio rendition available for group {group:?}")]
    MissingRendition { group: Option<String> },

    #[error("{kind} buffer sink error: {reason}")]
    Sink { kind: MediaKind, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl PlayerError {
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn sink(kind: MediaKind, reason: impl Into<String>) -> Self {
        Self::Sink {
            kind,
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the error came from fetching a resource rather than from local state.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::HttpStatus { .. } | Self::InvalidUrl { .. }
        )
    }
}
