//! Error types for the chat hub
//!
//! Defines crate-wide errors and handler send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::HandlerId;

/// Result alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors
///
/// Transport errors are surfaced to the immediate caller. Protocol
/// violations are fatal to the connection they occurred on.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a live stream (fatal to that connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("JSON configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// Declared or outgoing frame length exceeds the configured maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: u32 },

    /// Frame payload is not valid UTF-8
    #[error("invalid UTF-8 in frame: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Operation attempted on a closed connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Listening socket could not be set up
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Host name did not resolve to any address
    #[error("failed to resolve host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    /// Every resolved candidate refused the connection
    #[error("failed to connect to {target} after {attempts} attempt(s): {reason}")]
    ConnectFailed {
        target: String,
        attempts: usize,
        reason: String,
    },

    /// Channel send error (fatal - room actor is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// Outbound session was already started
    #[error("session already started")]
    AlreadyStarted,
}

/// Handler send errors
///
/// Sending to a stopped handler is not an error; only a peer that
/// cannot keep up with its outbound queue is reported.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The outbound queue is full; the peer has been evicted
    #[error("outbound queue full for handler {id}")]
    Backlogged { id: HandlerId },
}
