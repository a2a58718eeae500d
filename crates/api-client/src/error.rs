//! Error types for upstream API calls

/// Coarse category of an upstream failure, for metrics and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Transport,
    Status,
    AuthRejected,
    Exhausted,
    NoCredentials,
    Decode,
    InvalidEndpoint,
    InvalidUrl,
    NotFound,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Status => "status",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::NoCredentials => "no_credentials",
            ErrorKind::Decode => "decode",
            ErrorKind::InvalidEndpoint => "invalid_endpoint",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::NotFound => "not_found",
        }
    }
}

/// Errors from gateway and resolver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("credential rejected with {status}")]
    AuthRejected { status: u16 },

    #[error("credential pool exhausted: {0}")]
    Exhausted(String),

    #[error("no credentials configured")]
    NoCredentials,

    #[error("invalid upstream response: {0}")]
    Decode(String),

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("unsupported link: {0}")]
    InvalidUrl(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Status { .. } => ErrorKind::Status,
            Error::AuthRejected { .. } => ErrorKind::AuthRejected,
            Error::Exhausted(_) => ErrorKind::Exhausted,
            Error::NoCredentials => ErrorKind::NoCredentials,
            Error::Decode(_) => ErrorKind::Decode,
            Error::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
            Error::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Error::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// HTTP status returned by upstream, when there was one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } | Error::AuthRejected { status } => Some(*status),
            _ => None,
        }
    }

    /// Map a reqwest failure, dropping the URL so the credential in the query
    /// string never reaches logs or responses.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let timeout = err.is_timeout();
        let message = err.without_url().to_string();
        if timeout {
            Error::Timeout(message)
        } else {
            Error::Transport(message)
        }
    }
}

impl From<client_pool::Error> for Error {
    fn from(err: client_pool::Error) -> Self {
        match err {
            client_pool::Error::Exhausted { .. } => Error::Exhausted(err.to_string()),
            client_pool::Error::Empty => Error::NoCredentials,
        }
    }
}

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;
