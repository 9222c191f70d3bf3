//! Error types for the job directory streamer

use std::path::PathBuf;
use thiserror::Error;

/// Result type for streamer operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Streamer error types
#[derive(Error, Debug)]
pub enum StreamError {
    /// Invalid construction parameters
    #[error("configuration error: {0}")]
    Config(String),

    /// A released structured event's stream_id does not match its ESYNC
    /// barrier. Lost or reordered events; the job must be marked corrupt.
    #[error(
        "event ordering broken for shard ({pid}, {tid}): \
         barrier expects stream_id {expected}, queue head has {found}"
    )]
    OrderingViolation {
        pid: String,
        tid: String,
        expected: u64,
        found: String,
    },

    /// A harness marker matched but its type is not ESYNC or EVENT
    #[error("unknown harness marker type: {0}")]
    UnknownMarker(String),

    /// A harness marker payload that cannot be decoded
    #[error("malformed harness marker payload: {0}")]
    MalformedMarker(String),

    /// The events directory exists but cannot be read
    #[error("failed to read events directory {path}")]
    EventsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured event decoding failed
    #[error("event decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    /// Create a configuration error
    pub fn config<E: std::fmt::Display>(msg: E) -> Self {
        Self::Config(msg.to_string())
    }

    /// Check if this error indicates lost or reordered events
    pub fn is_ordering_violation(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }
}
