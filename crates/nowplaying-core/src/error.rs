use thiserror::Error;

/// Failures surfaced by the reader, the store and the supervisor.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any side effect (malformed station URL, bad query).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Connection failure, non-2xx status or a stream that ended early.
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    /// No bytes arrived within the read deadline.
    #[error("timed out waiting for stream data")]
    Timeout,

    /// The server answered without an `icy-metaint` header.
    #[error("this stream does not provide metadata")]
    NoMetadataSupported,

    /// Every scanned window lacked a `StreamTitle` marker.
    #[error("no stream title found")]
    TitleNotFound,

    #[error("track lookup failed: {0}")]
    LookupFailed(String),

    #[error("history store: {0}")]
    Store(String),
}

impl Error {
    /// Errors the monitor retries (and counts toward backoff).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StreamUnavailable(_) | Error::Timeout)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::StreamUnavailable(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::StreamUnavailable("refused".into()).is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(!Error::NoMetadataSupported.is_transient());
        assert!(!Error::InvalidInput("x".into()).is_transient());
        assert!(!Error::Store("disk".into()).is_transient());
    }
}
