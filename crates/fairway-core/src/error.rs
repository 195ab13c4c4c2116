//! Error types for fairway-core

use thiserror::Error;

/// Result type alias using fairway-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fairway-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No connectivity; no network attempt was made
    #[error("Offline: {0}")]
    Offline(String),

    /// The server rejected the payload (4xx); not retried automatically
    #[error("Remote rejected ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Transient remote failure (5xx, timeout); retried with backoff
    #[error("Remote transient failure: {0}")]
    RemoteTransient(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::RemoteTransient(format!("request timed out: {error}"))
        } else if error.is_connect() {
            Self::Offline(format!("connection failed: {error}"))
        } else {
            Self::Http(error.to_string())
        }
    }
}

impl Error {
    /// Whether a push attempt that hit this error should be retried later.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteTransient(_) | Self::Offline(_))
    }

    /// Whether this error means the device has no usable connectivity.
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::RemoteTransient("503".into()).is_transient());
        assert!(Error::Offline("no route".into()).is_transient());
        assert!(!Error::RemoteRejected {
            status: 422,
            message: "bad payload".into()
        }
        .is_transient());
    }

    #[test]
    fn offline_classification() {
        assert!(Error::Offline("down".into()).is_offline());
        assert!(!Error::RemoteTransient("500".into()).is_offline());
    }
}
