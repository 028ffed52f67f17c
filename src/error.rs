//! Error types for the Gemini Live client

use tokio_tungstenite::tungstenite::Error as WsError;

/// Error type for Gemini Live operations
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Opening, writing to or closing the connection channel failed.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Encoding an outbound message failed.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A server payload could not be decoded.
    #[error("Decode error: {message}. Snippet: {snippet}")]
    Decode { message: String, snippet: String },

    /// The payload was understood but this client does not handle it.
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// A capture or audio device is not available on this host.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Not connected")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl LiveError {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedContent(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::CapabilityUnavailable(msg.into())
    }

    /// Build a decode error carrying at most `SNIPPET_LEN` characters of the payload.
    pub fn decode(err: impl std::fmt::Display, payload: &str) -> Self {
        Self::Decode {
            message: err.to_string(),
            snippet: snippet(payload),
        }
    }

    /// Whether the error came from the connection channel.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::WebSocket(_))
    }
}

/// Maximum number of characters of a payload quoted in errors and logs.
pub const SNIPPET_LEN: usize = 200;

/// Truncate a payload for error reports and logs.
pub fn snippet(payload: &str) -> String {
    payload.chars().take(SNIPPET_LEN).collect()
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_truncates_payload() {
        let payload = "x".repeat(500);
        match LiveError::decode("bad json", &payload) {
            LiveError::Decode { message, snippet } => {
                assert_eq!(message, "bad json");
                assert_eq!(snippet.len(), SNIPPET_LEN);
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transport_classification() {
        assert!(LiveError::transport("boom").is_transport());
        assert!(!LiveError::NotConnected.is_transport());
        assert!(!LiveError::unsupported("image/png").is_transport());
    }
}
