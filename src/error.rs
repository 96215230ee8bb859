//! Error types for the chat relay.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that end a session or abort startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt history file {path}: line {line}: {source}")]
    CorruptHistory {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
