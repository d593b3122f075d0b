//! Page header encoding and page body layout.

use super::{put_varint_i64, statistics::Statistics, statistics::Value, ByteReader, FormatError};
use crate::schema::{DataType, Encoding};

/// Fixed-width part of a page header, excluding statistics.
const PAGE_HEADER_FIXED_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 4 + 8 + 8;

/// Metadata describing one page supplied by the page producer.
#[derive(Clone, Debug, PartialEq)]
pub struct PageDescriptor {
    /// Number of points in the page.
    pub value_count: u32,
    /// Aggregates of the page values.
    pub statistics: Statistics,
    /// Largest timestamp in the page.
    pub max_timestamp: i64,
    /// Smallest timestamp in the page.
    pub min_timestamp: i64,
    /// Raw-to-encoded size ratio in percent, kept for adaptive compression.
    pub compression_ratio: i32,
    /// Sum of the gaps between consecutive timestamps.
    pub time_interval_sum: i64,
    /// Sum of the squared gaps between consecutive timestamps.
    pub time_interval_square_sum: i64,
}

/// Header stored in front of every page body.
#[derive(Clone, Debug, PartialEq)]
pub struct PageHeader {
    /// Body size before compression.
    pub uncompressed_size: u32,
    /// Body size as stored.
    pub compressed_size: u32,
    /// Number of points in the page.
    pub value_count: u32,
    /// Aggregates of the page values.
    pub statistics: Statistics,
    /// Largest timestamp in the page.
    pub max_timestamp: i64,
    /// Smallest timestamp in the page.
    pub min_timestamp: i64,
    /// Raw-to-encoded size ratio in percent.
    pub compression_ratio: i32,
    /// Sum of the gaps between consecutive timestamps.
    pub time_interval_sum: i64,
    /// Sum of the squared gaps between consecutive timestamps.
    pub time_interval_square_sum: i64,
}

impl PageHeader {
    /// Combine a page descriptor with the body sizes.
    pub fn new(descriptor: PageDescriptor, uncompressed_size: u32, compressed_size: u32) -> Self {
        Self {
            uncompressed_size,
            compressed_size,
            value_count: descriptor.value_count,
            statistics: descriptor.statistics,
            max_timestamp: descriptor.max_timestamp,
            min_timestamp: descriptor.min_timestamp,
            compression_ratio: descriptor.compression_ratio,
            time_interval_sum: descriptor.time_interval_sum,
            time_interval_square_sum: descriptor.time_interval_square_sum,
        }
    }

    /// Serialize the header into `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.value_count.to_le_bytes());
        self.statistics.encode_into(buf);
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.min_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.compression_ratio.to_le_bytes());
        buf.extend_from_slice(&self.time_interval_sum.to_le_bytes());
        buf.extend_from_slice(&self.time_interval_square_sum.to_le_bytes());
    }

    /// Parse a header of a `data_type` page.
    pub fn decode_from(
        reader: &mut ByteReader<'_>,
        data_type: DataType,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            uncompressed_size: reader.u32()?,
            compressed_size: reader.u32()?,
            value_count: reader.u32()?,
            statistics: Statistics::decode_from(reader, data_type)?,
            max_timestamp: reader.i64()?,
            min_timestamp: reader.i64()?,
            compression_ratio: reader.i32()?,
            time_interval_sum: reader.i64()?,
            time_interval_square_sum: reader.i64()?,
        })
    }

    /// Exact serialized size.
    pub fn serialized_size(&self) -> usize {
        PAGE_HEADER_FIXED_SIZE + self.statistics.serialized_size()
    }

    /// Worst-case serialized size of a header for `data_type`.
    pub fn max_serialized_size(data_type: DataType) -> usize {
        PAGE_HEADER_FIXED_SIZE + Statistics::max_serialized_size(data_type)
    }
}

/// Encode the body of a page: `count u32 | timestamps | values`.
///
/// Timestamps follow `encoding`; values are always plain.
pub fn encode_page_body(encoding: Encoding, timestamps: &[i64], values: &[Value]) -> Vec<u8> {
    debug_assert_eq!(timestamps.len(), values.len());
    let mut buf = Vec::with_capacity(4 + timestamps.len() * 16);
    buf.extend_from_slice(&(timestamps.len() as u32).to_le_bytes());
    match encoding {
        Encoding::Plain => {
            for ts in timestamps {
                buf.extend_from_slice(&ts.to_le_bytes());
            }
        }
        Encoding::Delta => {
            let mut previous = 0i64;
            for (i, ts) in timestamps.iter().enumerate() {
                if i == 0 {
                    buf.extend_from_slice(&ts.to_le_bytes());
                } else {
                    put_varint_i64(&mut buf, ts.wrapping_sub(previous));
                }
                previous = *ts;
            }
        }
    }
    for value in values {
        value.encode_into(&mut buf);
    }
    buf
}

/// Decode a page body produced by [`encode_page_body`].
pub fn decode_page_body(
    body: &[u8],
    encoding: Encoding,
    data_type: DataType,
) -> Result<Vec<(i64, Value)>, FormatError> {
    let mut reader = ByteReader::new(body);
    let count = reader.u32()? as usize;
    let min_timestamp_width = match encoding {
        Encoding::Plain => 8,
        Encoding::Delta => 1,
    };
    let min_point_width = min_timestamp_width + data_type.fixed_width().unwrap_or(4);
    if count > reader.remaining().len() / min_point_width {
        return Err(FormatError::Corrupt("page point count exceeds page body"));
    }
    let mut timestamps = Vec::with_capacity(count);
    match encoding {
        Encoding::Plain => {
            for _ in 0..count {
                timestamps.push(reader.i64()?);
            }
        }
        Encoding::Delta => {
            let mut previous = 0i64;
            for i in 0..count {
                let ts = if i == 0 {
                    reader.i64()?
                } else {
                    previous.wrapping_add(reader.varint_i64()?)
                };
                timestamps.push(ts);
                previous = ts;
            }
        }
    }
    let mut points = Vec::with_capacity(count);
    for ts in timestamps {
        points.push((ts, Value::decode_from(&mut reader, data_type)?));
    }
    if !reader.remaining().is_empty() {
        return Err(FormatError::Corrupt("trailing bytes after page body"));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(data_type: DataType, values: &[Value]) -> PageHeader {
        let mut statistics = Statistics::new(data_type);
        for v in values {
            statistics.update(v).unwrap();
        }
        PageHeader::new(
            PageDescriptor {
                value_count: values.len() as u32,
                statistics,
                max_timestamp: 300,
                min_timestamp: 100,
                compression_ratio: 250,
                time_interval_sum: 200,
                time_interval_square_sum: 20_000,
            },
            64,
            40,
        )
    }

    #[test]
    fn header_encodes_every_field() {
        let header = sample_header(DataType::Int32, &[Value::Int32(4), Value::Int32(-2)]);
        let mut buf = Vec::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), header.serialized_size());
        assert!(buf.len() <= PageHeader::max_serialized_size(DataType::Int32));
        assert_eq!(&buf[0..4], &64u32.to_le_bytes());
        assert_eq!(&buf[4..8], &40u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());

        let mut reader = ByteReader::new(&buf);
        let decoded = PageHeader::decode_from(&mut reader, DataType::Int32).unwrap();
        assert!(reader.remaining().is_empty());
        assert_eq!(decoded, header);
    }

    #[test]
    fn delta_body_is_smaller_for_regular_series() {
        let timestamps: Vec<i64> = (0..100).map(|i| 1_700_000_000_000 + i * 1000).collect();
        let values: Vec<Value> = (0..100).map(Value::Int64).collect();

        let plain = encode_page_body(Encoding::Plain, &timestamps, &values);
        let delta = encode_page_body(Encoding::Delta, &timestamps, &values);
        assert!(delta.len() < plain.len());

        for (encoding, body) in [(Encoding::Plain, plain), (Encoding::Delta, delta)] {
            let points = decode_page_body(&body, encoding, DataType::Int64).unwrap();
            assert_eq!(points.len(), 100);
            assert_eq!(points[42], (timestamps[42], Value::Int64(42)));
        }
    }

    #[test]
    fn point_count_larger_than_body_is_corrupt() {
        for encoding in [Encoding::Plain, Encoding::Delta] {
            let err = decode_page_body(&u32::MAX.to_le_bytes(), encoding, DataType::Int64);
            assert!(matches!(err, Err(FormatError::Corrupt(_))));
        }

        let values = [Value::Int32(1), Value::Int32(2)];
        let mut body = encode_page_body(Encoding::Delta, &[5, 6], &values);
        body[..4].copy_from_slice(&3u32.to_le_bytes());
        assert!(decode_page_body(&body, Encoding::Delta, DataType::Int32).is_err());
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut body = encode_page_body(Encoding::Plain, &[1], &[Value::Boolean(true)]);
        body.push(0xFF);
        assert!(decode_page_body(&body, Encoding::Plain, DataType::Boolean).is_err());
    }
}
