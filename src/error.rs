//! Error types for linewire.

use thiserror::Error;

use crate::server::SessionId;

/// Main error type for all linewire operations.
///
/// Data-level validation failures are not errors: a message that fails
/// validation is delivered with its violations attached.
#[derive(Debug, Error)]
pub enum LinewireError {
    /// Bad argument: empty address, port 0, empty chunk.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Server operation invoked before `start()` (or after `stop()`).
    #[error("Server is not ready")]
    ServerNotReady,

    /// Channel operation invoked without a live transport.
    #[error("Not connected")]
    NotConnected,

    /// Operation addressed to an unknown or removed session.
    #[error("Remote connection not found: {0}")]
    SessionNotFound(SessionId),

    /// Protocol error (oversized frame, decoder misbehaviour, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation aborted through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error during connect/accept/read/write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Result type alias using LinewireError.
pub type Result<T> = std::result::Result<T, LinewireError>;
