//! Channel error types.

use thiserror::Error;

/// Channel error type.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication rejected by the backend. Fatal for the session,
    /// never retried automatically.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Not connected to the channel
    #[error("Not connected to channel")]
    NotConnected,

    /// Handshake or connect attempt timed out
    #[error("Operation timed out")]
    Timeout,

    /// Reconnect budget exhausted
    #[error("Gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Result type alias using ChannelError.
pub type ChannelResult<T> = Result<T, ChannelError>;
