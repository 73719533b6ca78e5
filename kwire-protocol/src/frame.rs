//! Length-prefixed frame format.
//!
//! Frame layout:
//!
//! ```text
//! +------------------+---------------------+
//! | length (int32)   | payload             |
//! | 4 bytes, BE      | `length` bytes      |
//! +------------------+---------------------+
//! ```
//!
//! The length counts only the payload, never the prefix itself.

use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Validates a raw length prefix against `max` and returns the payload size.
    pub fn parse_length(
        prefix: [u8; LENGTH_PREFIX_SIZE],
        max: usize,
    ) -> Result<usize, ProtocolError> {
        let length = i32::from_be_bytes(prefix);
        if length < 0 {
            return Err(ProtocolError::InvalidFrameLength(length));
        }
        let length = length as usize;
        if length > max {
            return Err(ProtocolError::FrameTooLarge { size: length, max });
        }
        Ok(length)
    }

    /// Encodes the frame (length prefix + payload).
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + self.payload.len());
        buf.put_i32(self.payload.len() as i32);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed unless a whole frame is available.
    pub fn decode(buf: &mut BytesMut, max: usize) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let prefix = [buf[0], buf[1], buf[2], buf[3]];
        let length = Self::parse_length(prefix, max)?;

        let total_len = LENGTH_PREFIX_SIZE + length;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let payload = buf.split_to(length).freeze();

        Ok(Some(Self { payload }))
    }
}
