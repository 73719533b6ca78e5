//! Request header decoding.
//!
//! Request payload layout (after the frame length prefix):
//!
//! ```text
//! int16 api_key | int16 api_version | int32 correlation_id
//!   [ int16 client_id_len, client_id bytes ]?
//!   [ uvarint tag_count, tag bytes ]?
//! ```
//!
//! The two trailing groups are optional. Their presence is decided by
//! whether bytes remain, not by the request version, so both the bare
//! fixed header and the flexible (v2) header decode.

use crate::codec::{
    read_fixed, read_nullable_string, read_unsigned_varint, write_fixed, write_nullable_string,
    write_unsigned_varint,
};
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the mandatory header fields in bytes.
pub const FIXED_HEADER_SIZE: usize = 8;

/// The client id of a request.
///
/// A null client id and an empty one are different values on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClientId {
    /// The payload ended before a client id was encoded.
    #[default]
    Absent,
    /// Encoded with length -1.
    Null,
    Present(String),
}

impl ClientId {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            ClientId::Present(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ClientId::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ClientId::Null)
    }
}

impl From<Option<String>> for ClientId {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(s) => ClientId::Present(s),
            None => ClientId::Null,
        }
    }
}

/// Header tagged fields, captured without interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTaggedFields {
    /// Declared number of tagged fields.
    pub count: u32,
    /// Everything after the count, or empty when `count` is 0.
    pub data: Bytes,
}

/// A decoded request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: ClientId,
    pub tagged_fields: Option<RawTaggedFields>,
}

impl Request {
    /// Creates a request carrying only the fixed header fields.
    pub fn new(api_key: i16, api_version: i16, correlation_id: i32) -> Self {
        Self {
            api_key,
            api_version,
            correlation_id,
            client_id: ClientId::Absent,
            tagged_fields: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_tagged_fields(mut self, count: u32, data: impl Into<Bytes>) -> Self {
        self.tagged_fields = Some(RawTaggedFields {
            count,
            data: data.into(),
        });
        self
    }

    /// Decodes a request from a frame payload.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut buf = payload;

        let api_key: i16 = read_fixed(&mut buf)?;
        let api_version: i16 = read_fixed(&mut buf)?;
        let correlation_id: i32 = read_fixed(&mut buf)?;

        let mut request = Self::new(api_key, api_version, correlation_id);
        if !buf.has_remaining() {
            return Ok(request);
        }

        request.client_id = read_nullable_string(&mut buf)?.into();
        if !buf.has_remaining() {
            return Ok(request);
        }

        // A nonzero count swallows the rest of the payload verbatim. This is
        // enough for ApiVersions, whose body is empty in the versions served;
        // it is not a per-entry tagged-field parser.
        let count = read_unsigned_varint(&mut buf)?;
        let data = if count > 0 {
            buf.copy_to_bytes(buf.remaining())
        } else {
            Bytes::new()
        };
        request.tagged_fields = Some(RawTaggedFields { count, data });

        Ok(request)
    }

    /// Reads the correlation id from a payload without decoding the rest.
    pub fn peek_correlation_id(payload: &[u8]) -> Option<i32> {
        let bytes = payload.get(4..FIXED_HEADER_SIZE)?;
        Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Returns the captured tag bytes, empty when none were captured.
    pub fn tag_buffer(&self) -> &[u8] {
        self.tagged_fields
            .as_ref()
            .map(|t| &t.data[..])
            .unwrap_or(&[])
    }

    /// Encodes the request into a frame payload.
    ///
    /// An absent client id followed by tagged fields cannot be expressed on
    /// the wire; it is written as a null client id.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FIXED_HEADER_SIZE + 16);
        write_fixed(&mut buf, self.api_key);
        write_fixed(&mut buf, self.api_version);
        write_fixed(&mut buf, self.correlation_id);

        match (&self.client_id, &self.tagged_fields) {
            (ClientId::Absent, None) => return Ok(buf),
            (ClientId::Present(s), _) => write_nullable_string(&mut buf, Some(s.as_str()))?,
            _ => write_nullable_string(&mut buf, None)?,
        }

        if let Some(tags) = &self.tagged_fields {
            write_unsigned_varint(&mut buf, tags.count);
            buf.put_slice(&tags.data);
        }

        Ok(buf)
    }
}
