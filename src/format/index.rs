//! Chunk index section and file tail.
//!
//! Layout: `INDEX_MARKER | count u32 | entries | crc32 u32 | index offset u64 | magic`.
//! The checksum covers the marker, the count and the entries.

use super::{
    chunk::ChunkIndexEntry, ByteReader, FormatError, INDEX_MARKER, SEGMENT_MAGIC,
    SEGMENT_TAIL_SIZE,
};

/// Encode the index section and tail for a file whose index starts at `index_offset`.
pub fn encode_index(entries: &[ChunkIndexEntry], index_offset: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(INDEX_MARKER);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        entry.encode_into(&mut buf);
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&index_offset.to_le_bytes());
    buf.extend_from_slice(SEGMENT_MAGIC);
    buf
}

/// Parsed file tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexTail {
    /// Checksum of the index body.
    pub crc32: u32,
    /// File offset of the index marker.
    pub index_offset: u64,
}

/// Parse the last [`SEGMENT_TAIL_SIZE`] bytes of a file.
pub fn decode_tail(tail: &[u8]) -> Result<IndexTail, FormatError> {
    if tail.len() != SEGMENT_TAIL_SIZE {
        return Err(FormatError::Corrupt("segment tail has wrong length"));
    }
    let mut reader = ByteReader::new(tail);
    let crc32 = reader.u32()?;
    let index_offset = reader.u64()?;
    if reader.remaining() != SEGMENT_MAGIC {
        return Err(FormatError::Corrupt("segment tail magic mismatch"));
    }
    Ok(IndexTail {
        crc32,
        index_offset,
    })
}

/// Decode the index body (marker through entries) and verify it against `tail`.
pub fn decode_index_body(
    body: &[u8],
    tail: IndexTail,
) -> Result<Vec<ChunkIndexEntry>, FormatError> {
    if crc32fast::hash(body) != tail.crc32 {
        return Err(FormatError::Corrupt("chunk index checksum mismatch"));
    }
    let mut reader = ByteReader::new(body);
    if reader.u8()? != INDEX_MARKER {
        return Err(FormatError::Corrupt("index marker mismatch"));
    }
    let count = reader.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        entries.push(ChunkIndexEntry::decode_from(&mut reader)?);
    }
    if !reader.remaining().is_empty() {
        return Err(FormatError::Corrupt("trailing bytes after chunk index"));
    }
    Ok(entries)
}
