//! Response model and encoding.
//!
//! Each supported operation has its own variant in [`Response`] and its own
//! body encoder, so adding an operation forces every `match` to handle it.
//!
//! ApiVersions payload layout (v3+, flexible):
//!
//! ```text
//! int32 correlation_id | int16 error_code
//! uvarint(n + 1) | { int16 api_key, int16 min, int16 max, 0x00 } * n
//! int32 throttle_time_ms | 0x00
//! ```

use crate::codec::{
    read_compact_array_len, read_fixed, skip_tagged_fields, write_compact_array_len,
    write_empty_tagged_fields, write_fixed,
};
use crate::error::{ErrorCode, ProtocolError};
use crate::ApiKey;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Encoded size of an [`ErrorResponse`] payload.
pub const ERROR_RESPONSE_SIZE: usize = 7;

/// Version range supported for one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersion {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

impl ApiVersion {
    pub const fn new(api_key: i16, min_version: i16, max_version: i16) -> Self {
        Self {
            api_key,
            min_version,
            max_version,
        }
    }

    pub fn supports(&self, version: i16) -> bool {
        (self.min_version..=self.max_version).contains(&version)
    }
}

/// ApiVersions response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersionsResponse {
    pub error_code: i16,
    /// Wire order is iteration order.
    pub api_keys: Vec<ApiVersion>,
    pub throttle_time_ms: i32,
}

impl ApiVersionsResponse {
    fn encode_body(&self, buf: &mut BytesMut) {
        write_fixed(buf, self.error_code);
        write_compact_array_len(buf, self.api_keys.len());
        for api in &self.api_keys {
            write_fixed(buf, api.api_key);
            write_fixed(buf, api.min_version);
            write_fixed(buf, api.max_version);
            write_empty_tagged_fields(buf);
        }
        write_fixed(buf, self.throttle_time_ms);
        write_empty_tagged_fields(buf);
    }

    /// Decodes a response payload, returning the correlation id with it.
    pub fn decode(payload: Bytes) -> Result<(i32, Self), ProtocolError> {
        let mut buf = payload;

        let correlation_id: i32 = read_fixed(&mut buf)?;
        let error_code: i16 = read_fixed(&mut buf)?;

        let count = read_compact_array_len(&mut buf)?.unwrap_or(0);
        let mut api_keys = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let api_key = read_fixed(&mut buf)?;
            let min_version = read_fixed(&mut buf)?;
            let max_version = read_fixed(&mut buf)?;
            skip_tagged_fields(&mut buf)?;
            api_keys.push(ApiVersion::new(api_key, min_version, max_version));
        }

        let throttle_time_ms = read_fixed(&mut buf)?;
        skip_tagged_fields(&mut buf)?;

        Ok((
            correlation_id,
            Self {
                error_code,
                api_keys,
                throttle_time_ms,
            },
        ))
    }

    /// Returns the known error code, if the wire value maps to one.
    pub fn error(&self) -> Option<ErrorCode> {
        ErrorCode::from_i16(self.error_code)
    }

    /// Looks up the advertised range for an API key.
    pub fn find(&self, api_key: i16) -> Option<&ApiVersion> {
        self.api_keys.iter().find(|a| a.api_key == api_key)
    }
}

/// A bare error reply: correlation id, error code, empty tagged fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: i16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error_code: code.as_i16(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        write_fixed(buf, self.error_code);
        write_empty_tagged_fields(buf);
    }

    /// Decodes an error reply payload, returning the correlation id with it.
    pub fn decode(payload: Bytes) -> Result<(i32, Self), ProtocolError> {
        let mut buf = payload;
        let correlation_id: i32 = read_fixed(&mut buf)?;
        let error_code: i16 = read_fixed(&mut buf)?;
        skip_tagged_fields(&mut buf)?;
        Ok((correlation_id, Self { error_code }))
    }
}

/// A response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ApiVersions(ApiVersionsResponse),
    Error(ErrorResponse),
}

impl Response {
    /// Encodes the response payload (without the frame length prefix).
    pub fn encode(&self, correlation_id: i32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(32);
        write_fixed(&mut buf, correlation_id);
        match self {
            Response::ApiVersions(body) => body.encode_body(&mut buf),
            Response::Error(body) => body.encode_body(&mut buf),
        }
        buf
    }

    pub fn error_code(&self) -> i16 {
        match self {
            Response::ApiVersions(body) => body.error_code,
            Response::Error(body) => body.error_code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code() == ErrorCode::None.as_i16()
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Response::ApiVersions(_) => ApiKey::ApiVersions.name(),
            Response::Error(_) => "Error",
        }
    }
}
