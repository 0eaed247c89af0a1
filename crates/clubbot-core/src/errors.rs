use std::path::PathBuf;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// tell a recoverable polling conflict apart from every other failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid artifact: {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    /// Another consumer is draining the same update stream.
    #[error("polling conflict: {0}")]
    Conflict(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
