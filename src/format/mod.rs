//! Byte-exact encodings shared by the chunk writer and the segment reader.
//!
//! All integers are little endian. Headers are encoded into caller-provided
//! `Vec<u8>` buffers and decoded from byte slices, returning the unread tail so
//! records can be walked back to back.

pub mod chunk;
pub mod codec;
pub mod index;
pub mod page;
pub mod statistics;

use std::io;

use thiserror::Error;

/// Magic bytes opening and closing every segment file (`"SGMT"`).
pub const SEGMENT_MAGIC: &[u8; 4] = b"SGMT";

/// Current segment format version, written right after the head magic.
pub const SEGMENT_VERSION: u8 = 1;

/// Length of the head section (`magic | version`).
pub const SEGMENT_HEAD_SIZE: usize = SEGMENT_MAGIC.len() + 1;

/// Record marker opening a chunk group (all chunks of one device).
pub const CHUNK_GROUP_MARKER: u8 = 0;

/// Record marker opening a chunk header.
pub const CHUNK_MARKER: u8 = 1;

/// Record marker opening the chunk index section.
pub const INDEX_MARKER: u8 = 2;

/// Length of the fixed tail (`crc32 | index offset | magic`).
pub const SEGMENT_TAIL_SIZE: usize = 4 + 8 + SEGMENT_MAGIC.len();

/// Errors raised while decoding segment structures.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Structurally invalid or truncated bytes.
    #[error("corrupt segment data: {0}")]
    Corrupt(&'static str),
    /// The page codec failed.
    #[error("codec failure: {0}")]
    Codec(#[source] io::Error),
}

/// Forward-only reader over an encoded byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    /// Wrap a slice.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        self.bytes
    }

    /// Consume exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if self.bytes.len() < len {
            return Err(FormatError::Corrupt("unexpected end of data"));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Consume one byte.
    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Consume a `u32`.
    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Consume an `i32`.
    pub fn i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Consume a `u64`.
    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Consume an `i64`.
    pub fn i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Consume an `f32`.
    pub fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Consume an `f64`.
    pub fn f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Consume a `u32`-length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<&'a [u8], FormatError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Consume a `u32`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String, FormatError> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| FormatError::Corrupt("invalid utf-8 string"))
    }

    /// Consume a zig-zag LEB128 signed integer.
    pub fn varint_i64(&mut self) -> Result<i64, FormatError> {
        let mut shift = 0u32;
        let mut raw = 0u64;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(FormatError::Corrupt("varint overflow"));
            }
            raw |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }
}

/// Append a `u32`-length-prefixed byte string.
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Append a zig-zag LEB128 signed integer.
pub fn put_varint_i64(buf: &mut Vec<u8>, value: i64) {
    let mut raw = ((value << 1) ^ (value >> 63)) as u64;
    while raw >= 0x80 {
        buf.push((raw as u8) | 0x80);
        raw >>= 7;
    }
    buf.push(raw as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_handles_extremes() {
        let values = [0, 1, -1, 63, -64, 64, i64::MAX, i64::MIN, 1_700_000_000_000];
        let mut buf = Vec::new();
        for value in values {
            put_varint_i64(&mut buf, value);
        }
        let mut reader = ByteReader::new(&buf);
        for value in values {
            assert_eq!(reader.varint_i64().unwrap(), value);
        }
        assert!(reader.remaining().is_empty());
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert!(matches!(reader.u32(), Err(FormatError::Corrupt(_))));

        let mut buf = Vec::new();
        put_bytes(&mut buf, b"device");
        buf.truncate(buf.len() - 1);
        assert!(ByteReader::new(&buf).string().is_err());
    }
}
