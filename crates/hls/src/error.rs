use thiserror::Error;

#[derive(Debug, Error)]
pub enum HlsError {
    #[error("master playlist `{url}` declares no playable variants")]
    NoVariants { url: String },
}
