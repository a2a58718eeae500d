//! Service-specific error types

use thiserror::Error;

/// Media download failures.
///
/// Upstream API failures stay as `api_client::Error`; these cover fetching
/// the media file itself and writing it to disk.
#[derive(Error, Debug)]
pub enum Error {
    #[error("download URL is empty")]
    EmptyUrl,

    #[error("file too large: {size} bytes (max {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("media server returned {0}")]
    Status(u16),

    #[error("download timed out after {0}s")]
    Timeout(u64),

    #[error("download failed: {0}")]
    Transport(String),

    #[error("download slots are closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Error::EmptyUrl => "empty_url",
            Error::TooLarge { .. } => "too_large",
            Error::Status(_) => "status",
            Error::Timeout(_) => "timeout",
            Error::Transport(_) => "transport",
            Error::Closed => "closed",
            Error::Io(_) => "io",
        }
    }

    /// Signed media URLs stay out of the message.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        Error::Transport(err.without_url().to_string())
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
