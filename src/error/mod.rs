//! Error handling module for the health sidecar

use std::time::Duration;
use thiserror::Error;

/// Custom error type for the health sidecar
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index {index} out of range (have {len} targets)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Malformed index: {0:?}")]
    MalformedIndex(String),

    #[error("Probe of {endpoint} failed: {reason}")]
    ProbeFailure { endpoint: String, reason: String },

    #[error("Probe of {endpoint} timed out after {}ms", .timeout.as_millis())]
    ProbeTimeout { endpoint: String, timeout: Duration },

    #[error("Unexpected reply from {endpoint}: {reply:?}")]
    UnexpectedReply { endpoint: String, reply: String },

    #[error("Listener startup error: {0}")]
    ListenerStartup(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors caused by the HTTP caller rather than by the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::IndexOutOfRange { .. } | Error::MalformedIndex(_))
    }
}

/// Result type for the health sidecar
pub type Result<T> = std::result::Result<T, Error>;
