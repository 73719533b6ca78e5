//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("invalid nullable string length: {0}")]
    InvalidNullableStringLength(i16),

    #[error("string too long for int16 length prefix: {0} bytes")]
    StringTooLong(usize),

    #[error("varint overflow: more than {max_bytes} bytes")]
    VarintOverflow { max_bytes: usize },

    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn truncated(needed: usize, remaining: usize) -> Self {
        ProtocolError::TruncatedInput { needed, remaining }
    }
}

/// Kafka error codes carried in response bodies.
///
/// The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    None,
    CorruptMessage,
    UnsupportedVersion,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_i16(self) -> i16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::CorruptMessage => 2,
            ErrorCode::UnsupportedVersion => 35,
            ErrorCode::InvalidRequest => 42,
        }
    }

    /// Maps a wire value back to a known code.
    pub fn from_i16(code: i16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::None),
            2 => Some(ErrorCode::CorruptMessage),
            35 => Some(ErrorCode::UnsupportedVersion),
            42 => Some(ErrorCode::InvalidRequest),
            _ => None,
        }
    }

    /// Returns whether a client may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::CorruptMessage)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::None => write!(f, "NONE"),
            ErrorCode::CorruptMessage => write!(f, "CORRUPT_MESSAGE"),
            ErrorCode::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
            ErrorCode::InvalidRequest => write!(f, "INVALID_REQUEST"),
        }
    }
}
