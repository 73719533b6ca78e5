//! Server error types.

use kwire_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Label used for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "io",
            ServerError::Protocol(ProtocolError::InvalidFrameLength(_))
            | ServerError::Protocol(ProtocolError::FrameTooLarge { .. }) => "frame",
            ServerError::Protocol(ProtocolError::TruncatedInput { .. }) => "truncated",
            ServerError::Protocol(_) => "decode",
            ServerError::ShuttingDown => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = ServerError::from(ProtocolError::TruncatedInput {
            needed: 8,
            remaining: 3,
        });
        assert_eq!(err.kind(), "truncated");
        assert!(err.to_string().contains("need 8 bytes"));

        let err = ServerError::from(ProtocolError::InvalidFrameLength(-1));
        assert_eq!(err.kind(), "frame");

        let err = ServerError::from(ProtocolError::InvalidNullableStringLength(-3));
        assert_eq!(err.kind(), "decode");

        let err = ServerError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().starts_with("I/O error"));
    }
}
