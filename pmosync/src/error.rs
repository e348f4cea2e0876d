//! Error types for the synchronization engine
//!
//! Every failure listed here is handled locally by the engine: transport
//! errors trigger the reconnect policy, heartbeat errors keep the previous
//! [`SyncStatus`](crate::models::SyncStatus), rhythm errors degrade the song
//! to "no events" and malformed push messages are dropped.

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the synchronization engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Push socket closed or errored
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single heartbeat round trip failed
    #[error("Heartbeat failed: {0}")]
    Heartbeat(String),

    /// Rhythm payload is not valid base64
    #[error("Rhythm payload decode failed: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Rhythm payload could not be inflated
    #[error("Rhythm payload decompression failed: {0}")]
    Decompression(String),

    /// Inflated rhythm payload does not match the event schema
    #[error("Rhythm payload deserialization failed: {0}")]
    Deserialization(String),

    /// Push message could not be parsed
    #[error("Malformed push message: {0}")]
    MalformedMessage(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a heartbeat error
    pub fn heartbeat(msg: impl Into<String>) -> Self {
        Self::Heartbeat(msg.into())
    }

    /// Create a malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// True for the three failures of the rhythm decoding pipeline
    pub fn is_rhythm_error(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Decompression(_) | Self::Deserialization(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
