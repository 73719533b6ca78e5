//! Client error types.

use kwire_protocol::ErrorCode;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] kwire_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    /// The server wrote plain bytes instead of a frame, then closed.
    #[error("unframed reply: {0}")]
    UnframedReply(String),

    #[error("server error: code {code}")]
    ServerError { code: i16 },

    #[error("correlation id mismatch: sent {expected}, received {actual}")]
    CorrelationMismatch { expected: i32, actual: i32 },
}

impl ClientError {
    /// Returns the known error code for a server error.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::ServerError { code } => ErrorCode::from_i16(*code),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::ServerError { .. } => self.error_code().is_some_and(|c| c.is_retryable()),
            _ => false,
        }
    }
}
