//! Primitive wire codecs and the buffered frame decoder.
//!
//! All fixed-width integers are big-endian. Unsigned varints use base-128
//! little-endian groups where the high bit of each byte marks continuation.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum encoded size of a 32-bit unsigned varint.
pub const MAX_VARINT_BYTES: usize = 5;

/// Maximum encoded size of a 64-bit unsigned varint.
pub const MAX_VARLONG_BYTES: usize = 10;

/// A fixed-width integer with a big-endian wire representation.
pub trait FixedInt: Sized + Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;

    fn get_from<B: Buf>(buf: &mut B) -> Self;

    fn put_into<B: BufMut>(self, buf: &mut B);
}

macro_rules! impl_fixed_int {
    ($($ty:ty => $get:ident, $put:ident;)*) => {
        $(
            impl FixedInt for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn get_from<B: Buf>(buf: &mut B) -> Self {
                    buf.$get()
                }

                fn put_into<B: BufMut>(self, buf: &mut B) {
                    buf.$put(self)
                }
            }
        )*
    };
}

impl_fixed_int! {
    i8 => get_i8, put_i8;
    u8 => get_u8, put_u8;
    i16 => get_i16, put_i16;
    u16 => get_u16, put_u16;
    i32 => get_i32, put_i32;
    u32 => get_u32, put_u32;
    i64 => get_i64, put_i64;
}

/// Reads a big-endian fixed-width integer.
pub fn read_fixed<T: FixedInt, B: Buf>(buf: &mut B) -> Result<T, ProtocolError> {
    if buf.remaining() < T::WIDTH {
        return Err(ProtocolError::truncated(T::WIDTH, buf.remaining()));
    }
    Ok(T::get_from(buf))
}

/// Writes a big-endian fixed-width integer.
pub fn write_fixed<T: FixedInt, B: BufMut>(buf: &mut B, value: T) {
    value.put_into(buf);
}

/// Reads a NULLABLE_STRING: an `int16` length followed by that many bytes.
///
/// Returns `None` for length `-1` and `Some("")` for length `0`. Bytes that
/// are not valid UTF-8 are replaced rather than rejected.
pub fn read_nullable_string<B: Buf>(buf: &mut B) -> Result<Option<String>, ProtocolError> {
    let len: i16 = read_fixed(buf)?;
    match len {
        -1 => Ok(None),
        0 => Ok(Some(String::new())),
        n if n < 0 => Err(ProtocolError::InvalidNullableStringLength(n)),
        n => {
            let n = n as usize;
            if buf.remaining() < n {
                return Err(ProtocolError::truncated(n, buf.remaining()));
            }
            let raw = buf.copy_to_bytes(n);
            Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
        }
    }
}

/// Writes a NULLABLE_STRING.
pub fn write_nullable_string<B: BufMut>(
    buf: &mut B,
    value: Option<&str>,
) -> Result<(), ProtocolError> {
    match value {
        None => buf.put_i16(-1),
        Some(s) => {
            let len =
                i16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong(s.len()))?;
            buf.put_i16(len);
            buf.put_slice(s.as_bytes());
        }
    }
    Ok(())
}

/// Reads a 32-bit unsigned varint (at most 5 bytes).
pub fn read_unsigned_varint<B: Buf>(buf: &mut B) -> Result<u32, ProtocolError> {
    read_varint_bits(buf, 32).map(|v| v as u32)
}

/// Reads a 64-bit unsigned varint (at most 10 bytes).
pub fn read_unsigned_varlong<B: Buf>(buf: &mut B) -> Result<u64, ProtocolError> {
    read_varint_bits(buf, 64)
}

fn read_varint_bits<B: Buf>(buf: &mut B, width: u32) -> Result<u64, ProtocolError> {
    let max_bytes = width.div_ceil(7) as usize;
    let mut value = 0u64;

    for i in 0..max_bytes {
        if !buf.has_remaining() {
            return Err(ProtocolError::truncated(1, 0));
        }
        let byte = buf.get_u8();
        let group = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;

        // The last group may only carry the bits left in the target width.
        if shift + 7 > width && group >> (width - shift) != 0 {
            return Err(ProtocolError::VarintOverflow { max_bytes });
        }
        value |= group << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(ProtocolError::VarintOverflow { max_bytes })
}

/// Writes a 32-bit unsigned varint.
pub fn write_unsigned_varint<B: BufMut>(buf: &mut B, value: u32) {
    write_unsigned_varlong(buf, value as u64);
}

/// Writes a 64-bit unsigned varint.
pub fn write_unsigned_varlong<B: BufMut>(buf: &mut B, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Writes a COMPACT_ARRAY length: `n + 1` as an unsigned varint.
pub fn write_compact_array_len<B: BufMut>(buf: &mut B, len: usize) {
    write_unsigned_varint(buf, (len as u32).saturating_add(1));
}

/// Reads a COMPACT_ARRAY length. A raw value of 0 means a null array.
pub fn read_compact_array_len<B: Buf>(buf: &mut B) -> Result<Option<usize>, ProtocolError> {
    match read_unsigned_varint(buf)? {
        0 => Ok(None),
        n => Ok(Some((n - 1) as usize)),
    }
}

/// Writes an empty tagged-fields block (a single zero count).
pub fn write_empty_tagged_fields<B: BufMut>(buf: &mut B) {
    buf.put_u8(0);
}

/// Skips a tagged-fields block, stepping over each `(tag, size, data)` entry.
pub fn skip_tagged_fields<B: Buf>(buf: &mut B) -> Result<(), ProtocolError> {
    let count = read_unsigned_varint(buf)?;
    for _ in 0..count {
        let _tag = read_unsigned_varint(buf)?;
        let size = read_unsigned_varint(buf)? as usize;
        if buf.remaining() < size {
            return Err(ProtocolError::truncated(size, buf.remaining()));
        }
        buf.advance(size);
    }
    Ok(())
}

/// Accumulates bytes from a stream and splits them into frames.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.max_frame_size)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drains and returns everything buffered so far.
    pub fn take_buffered(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
