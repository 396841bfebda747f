//! Error types for the sync core.
//!
//! Expected conditions (session not found, network hiccups, socket drops) are
//! turned into signals by the reconciler and transport; these types only cross
//! the public boundary from the command client, config loading, and explicit
//! persistence setup.

use thiserror::Error;

/// Errors from the session command API
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("session not found")]
    NotFound,

    #[error("server returned {0}")]
    Status(reqwest::StatusCode),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0}")]
    Rejected(String),
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::NotFound)
    }
}

/// Errors raised inside a single transport connection attempt
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection closed")]
    Closed,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("frame error: {0}")]
    Frame(#[from] boardbank_protocol::FrameError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors from the durable cache backend
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        source: url::ParseError,
    },

    #[error("invalid URL scheme {scheme:?} for {field} (expected {expected})")]
    InvalidScheme {
        field: &'static str,
        scheme: String,
        expected: &'static str,
    },
}
