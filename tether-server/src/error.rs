//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),
}

/// Failure raised inside a handling layer while processing one message.
///
/// Caught at the dispatch boundary; the layer counts as not having
/// handled the message and the connection stays open.
#[derive(Debug, Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError::new("script raised");
        assert_eq!(err.to_string(), "handler failed: script raised");
    }

    #[test]
    fn test_server_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err = ServerError::from(io);
        assert!(err.to_string().contains("gone"));
    }
}
