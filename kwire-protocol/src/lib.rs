//! # kwire-protocol
//!
//! Wire protocol implementation for kwire, a subset of the Kafka client
//! protocol.
//!
//! This crate provides:
//! - Length-prefixed framing (`int32` size + payload)
//! - Primitive codecs: fixed-width big-endian integers, nullable strings,
//!   unsigned varints, compact array lengths
//! - Request header decoding (and encoding, for clients)
//! - Response encoding (and decoding, for clients)
//! - Error codes and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod request;
pub mod response;

pub use codec::FrameDecoder;
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, LENGTH_PREFIX_SIZE};
pub use request::{ClientId, RawTaggedFields, Request};
pub use response::{
    ApiVersion, ApiVersionsResponse, ErrorResponse, Response, ERROR_RESPONSE_SIZE,
};

/// Default port for the kwire server.
pub const DEFAULT_PORT: u16 = 9092;

/// Default maximum frame payload size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Known API keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKey {
    SaslHandshake = 17,
    ApiVersions = 18,
}

impl ApiKey {
    pub fn from_i16(key: i16) -> Option<Self> {
        match key {
            17 => Some(ApiKey::SaslHandshake),
            18 => Some(ApiKey::ApiVersions),
            _ => None,
        }
    }

    pub const fn as_i16(self) -> i16 {
        self as i16
    }

    /// Returns the protocol name of the API.
    pub fn name(self) -> &'static str {
        match self {
            ApiKey::SaslHandshake => "SaslHandshake",
            ApiKey::ApiVersions => "ApiVersions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_lookup() {
        assert_eq!(ApiKey::from_i16(18), Some(ApiKey::ApiVersions));
        assert_eq!(ApiKey::from_i16(17), Some(ApiKey::SaslHandshake));
        assert_eq!(ApiKey::from_i16(999), None);
        assert_eq!(ApiKey::from_i16(-1), None);
        assert_eq!(ApiKey::ApiVersions.as_i16(), 18);
        assert_eq!(ApiKey::ApiVersions.name(), "ApiVersions");
    }
}
