//! Error types for DocGate
//!
//! Process-level failures: configuration, I/O, framing. Command-level
//! failures that are reported back to clients live in the compat crate.

use thiserror::Error;

/// Result type alias using DocGate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for DocGate
#[derive(Error, Debug)]
pub enum Error {
    // Protocol Errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire framing errors. These desynchronize the byte stream, so the
/// connection that produced one is closed.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Message of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Incomplete message")]
    IncompleteMessage,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err: Error = ProtocolError::MessageTooLarge { size: 100, max: 10 }.into();
        assert_eq!(
            err.to_string(),
            "Protocol error: Message of 100 bytes exceeds the maximum of 10 bytes"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }
}
