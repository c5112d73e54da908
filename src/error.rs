//! Centralized error types for smtp2mqtt.

use thiserror::Error;

/// All errors produced by the smtp2mqtt library.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// I/O error with a short description of what was being done.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// The message header block could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The `Content-Type` header is missing or cannot be parsed.
    #[error("Invalid Content-Type '{value}': {reason}")]
    ContentType { value: String, reason: String },

    /// A MIME part could not be read from the multipart stream.
    #[error("MIME decoding error: {0}")]
    MimeError(String),

    /// The structured payload could not be serialized.
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Publishing to the message bus failed.
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, BridgeError>`.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Create an `Io` variant from a context description and an `io::Error`.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no better context is available.
impl From<std::io::Error> for BridgeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            context: "handling a connection".to_string(),
            source,
        }
    }
}
