//! Chunk header, chunk group header and chunk index encodings.

use super::{
    codec::CompressionKind, put_bytes, statistics::Statistics, ByteReader, FormatError,
    CHUNK_GROUP_MARKER, CHUNK_MARKER,
};
use crate::schema::{DataType, Encoding, SeriesPath};

/// Header written in front of the page records of one chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkHeader {
    /// Measurement the chunk stores.
    pub measurement: String,
    /// Length of the page records following the header.
    pub data_size: u32,
    /// Value type.
    pub data_type: DataType,
    /// Codec applied to page bodies.
    pub compression: CompressionKind,
    /// Timestamp encoding of page bodies.
    pub encoding: Encoding,
    /// Number of page records.
    pub page_count: u32,
    /// Aggregates over the whole chunk.
    pub statistics: Statistics,
    /// Largest timestamp in the chunk.
    pub max_timestamp: i64,
    /// Smallest timestamp in the chunk.
    pub min_timestamp: i64,
}

impl ChunkHeader {
    /// Serialize the header, including its leading marker byte.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(CHUNK_MARKER);
        put_bytes(buf, self.measurement.as_bytes());
        buf.extend_from_slice(&self.data_size.to_le_bytes());
        buf.push(self.data_type.as_u8());
        buf.push(self.compression.as_u8());
        buf.push(self.encoding.as_u8());
        buf.extend_from_slice(&self.page_count.to_le_bytes());
        self.statistics.encode_into(buf);
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.min_timestamp.to_le_bytes());
    }

    /// Parse a header whose marker byte has already been consumed.
    pub fn decode_after_marker(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let measurement = reader.string()?;
        let data_size = reader.u32()?;
        let data_type = DataType::try_from(reader.u8()?)?;
        let compression = CompressionKind::try_from(reader.u8()?)?;
        let encoding = Encoding::try_from(reader.u8()?)?;
        let page_count = reader.u32()?;
        let statistics = Statistics::decode_from(reader, data_type)?;
        Ok(Self {
            measurement,
            data_size,
            data_type,
            compression,
            encoding,
            page_count,
            statistics,
            max_timestamp: reader.i64()?,
            min_timestamp: reader.i64()?,
        })
    }

    /// Parse a header including its marker byte.
    pub fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        if reader.u8()? != CHUNK_MARKER {
            return Err(FormatError::Corrupt("chunk marker mismatch"));
        }
        Self::decode_after_marker(reader)
    }

    /// Exact serialized size, marker included.
    pub fn serialized_size(&self) -> usize {
        1 + 4 + self.measurement.len() + 4 + 3 + 4 + self.statistics.serialized_size() + 8 + 8
    }
}

/// Append a chunk group header for `device`.
pub fn encode_chunk_group_header(device: &str, buf: &mut Vec<u8>) {
    buf.push(CHUNK_GROUP_MARKER);
    put_bytes(buf, device.as_bytes());
}

/// Location and summary of one stored chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkIndexEntry {
    /// Series the chunk belongs to.
    pub series: SeriesPath,
    /// File offset of the chunk header marker.
    pub offset: u64,
    /// Value type.
    pub data_type: DataType,
    /// Total number of points.
    pub value_count: u64,
    /// Number of page records actually stored.
    pub page_count: u32,
    /// Page count reported to compaction heuristics.
    pub virtual_page_count: u32,
    /// Smallest timestamp.
    pub min_timestamp: i64,
    /// Largest timestamp.
    pub max_timestamp: i64,
    /// Aggregates over the chunk.
    pub statistics: Statistics,
}

impl ChunkIndexEntry {
    /// Serialize the entry.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        put_bytes(buf, self.series.device().as_bytes());
        put_bytes(buf, self.series.measurement().as_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.push(self.data_type.as_u8());
        buf.extend_from_slice(&self.value_count.to_le_bytes());
        buf.extend_from_slice(&self.page_count.to_le_bytes());
        buf.extend_from_slice(&self.virtual_page_count.to_le_bytes());
        buf.extend_from_slice(&self.min_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        self.statistics.encode_into(buf);
    }

    /// Parse one entry.
    pub fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, FormatError> {
        let device = reader.string()?;
        let measurement = reader.string()?;
        let offset = reader.u64()?;
        let data_type = DataType::try_from(reader.u8()?)?;
        Ok(Self {
            series: SeriesPath::new(device, measurement),
            offset,
            data_type,
            value_count: reader.u64()?,
            page_count: reader.u32()?,
            virtual_page_count: reader.u32()?,
            min_timestamp: reader.i64()?,
            max_timestamp: reader.i64()?,
            statistics: Statistics::decode_from(reader, data_type)?,
        })
    }

    /// Approximate in-memory footprint, used for metadata cost estimates.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.series.device().len()
            + self.series.measurement().len()
            + self.statistics.serialized_size()
    }
}
