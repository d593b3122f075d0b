use super::ChunkError;
use crate::{
    format::{
        chunk::ChunkHeader,
        codec::{Codec, DEFAULT_ZSTD_LEVEL},
        page::{PageDescriptor, PageHeader},
        statistics::Statistics,
    },
    observability::{log_error, log_warn},
    schema::SeriesSchema,
    segment::SegmentError,
};

/// Destination of a flushed chunk.
///
/// A chunk is written as `start_chunk`, any number of `write_bytes`, then
/// `end_chunk`. `abort_chunk` discards everything written since `start_chunk`.
pub trait ChunkSink {
    /// Write the chunk header; returns its encoded length.
    fn start_chunk(&mut self, header: ChunkHeader) -> Result<usize, SegmentError>;

    /// Current write offset.
    fn position(&self) -> u64;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SegmentError>;

    /// Complete the open chunk and record it in the sink's index.
    fn end_chunk(
        &mut self,
        value_count: u64,
        page_count: u32,
        virtual_page_count: u32,
    ) -> Result<(), SegmentError>;

    fn abort_chunk(&mut self) -> Result<(), SegmentError>;
}

/// Accumulates serialized pages of one series until they are flushed as a
/// single chunk.
#[derive(Debug)]
pub struct ChunkPageBuffer {
    schema: SeriesSchema,
    codec: Codec,
    page_count: u32,
    total_value_count: u64,
    max_timestamp: i64,
    min_timestamp: Option<i64>,
    buffer: Vec<u8>,
}

impl ChunkPageBuffer {
    pub fn new(schema: SeriesSchema) -> Self {
        Self::with_zstd_level(schema, DEFAULT_ZSTD_LEVEL)
    }

    pub fn with_zstd_level(schema: SeriesSchema, zstd_level: i32) -> Self {
        Self {
            codec: Codec::with_level(schema.compression(), zstd_level),
            schema,
            page_count: 0,
            total_value_count: 0,
            max_timestamp: i64::MIN,
            min_timestamp: None,
            buffer: Vec::new(),
        }
    }

    /// Compress `data` with the schema codec and append it behind a freshly
    /// built page header. Returns the number of bytes appended.
    ///
    /// The buffer is left untouched when the page is rejected.
    pub fn write_page(
        &mut self,
        data: &[u8],
        descriptor: PageDescriptor,
    ) -> Result<usize, ChunkError> {
        self.check_page(descriptor.min_timestamp, &descriptor.statistics)?;
        let uncompressed = page_len(data.len())?;
        let stored = self
            .codec
            .compress(data)
            .map_err(|err| ChunkError::PageEncoding(err.to_string()))?;
        let header = PageHeader::new(descriptor, uncompressed, page_len(stored.len())?);
        Ok(self.append(&header, &stored))
    }

    /// Append a page whose header was built elsewhere; `data` is stored as is.
    pub fn write_page_with_header(
        &mut self,
        data: &[u8],
        header: PageHeader,
    ) -> Result<usize, ChunkError> {
        self.check_page(header.min_timestamp, &header.statistics)?;
        if header.compressed_size as usize != data.len() {
            return Err(ChunkError::PageEncoding(format!(
                "page header declares {} stored bytes, got {}",
                header.compressed_size,
                data.len()
            )));
        }
        Ok(self.append(&header, data))
    }

    fn check_page(&self, min_timestamp: i64, statistics: &Statistics) -> Result<(), ChunkError> {
        if self.min_timestamp.is_none() && min_timestamp == i64::MIN {
            return Err(ChunkError::PageEncoding(format!(
                "first page of {} has no timestamp baseline",
                self.schema.measurement()
            )));
        }
        if statistics.data_type() != self.schema.data_type() {
            return Err(ChunkError::PageEncoding(format!(
                "page statistics are {:?}, series {} is {:?}",
                statistics.data_type(),
                self.schema.measurement(),
                self.schema.data_type()
            )));
        }
        Ok(())
    }

    fn append(&mut self, header: &PageHeader, body: &[u8]) -> usize {
        let before = self.buffer.len();
        header.encode_into(&mut self.buffer);
        self.buffer.extend_from_slice(body);

        self.page_count += 1;
        self.total_value_count += u64::from(header.value_count);
        self.max_timestamp = self.max_timestamp.max(header.max_timestamp);
        self.min_timestamp = Some(match self.min_timestamp {
            Some(min) => min.min(header.min_timestamp),
            None => header.min_timestamp,
        });
        self.buffer.len() - before
    }

    /// Write the buffered pages to `sink` as one chunk.
    ///
    /// Returns the header plus data bytes written, or `0` when nothing was
    /// buffered. The buffer itself is not cleared.
    pub fn flush_to<S>(
        &self,
        sink: &mut S,
        statistics: &Statistics,
        virtual_page_count: u32,
    ) -> Result<u64, ChunkError>
    where
        S: ChunkSink + ?Sized,
    {
        if self.total_value_count == 0 {
            return Ok(0);
        }
        let expected = self.buffer.len() as u64;
        let header = ChunkHeader {
            measurement: self.schema.measurement().to_string(),
            data_size: u32::try_from(self.buffer.len())
                .map_err(|_| ChunkError::PageEncoding("chunk exceeds 4 GiB".to_string()))?,
            data_type: self.schema.data_type(),
            compression: self.codec.kind(),
            encoding: self.schema.encoding(),
            page_count: self.page_count,
            statistics: statistics.clone(),
            max_timestamp: self.max_timestamp,
            min_timestamp: self.min_timestamp.unwrap_or(i64::MIN),
        };

        let header_len = sink.start_chunk(header)?;
        let data_start = sink.position();
        sink.write_bytes(&self.buffer)?;
        let actual = sink.position().saturating_sub(data_start);
        if actual != expected {
            log_error!(
                component = "chunk",
                event = "chunk_flush_inconsistent",
                measurement = self.schema.measurement(),
                expected,
                actual,
            );
            if let Err(err) = sink.abort_chunk() {
                log_warn!(
                    component = "chunk",
                    event = "chunk_abort_failed",
                    error = %err,
                );
            }
            return Err(ChunkError::Consistency { expected, actual });
        }
        sink.end_chunk(self.total_value_count, self.page_count, virtual_page_count)?;
        Ok(header_len as u64 + actual)
    }

    /// Drop buffered pages and aggregates, keeping the schema.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.page_count = 0;
        self.total_value_count = 0;
        self.max_timestamp = i64::MIN;
        self.min_timestamp = None;
    }

    /// Rebind the buffer to another series and reset it.
    pub fn reinit(&mut self, schema: SeriesSchema) {
        self.codec = Codec::with_level(schema.compression(), self.codec.level());
        self.schema = schema;
        self.reset();
    }

    /// Buffered bytes plus room for one more page header.
    pub fn estimate_max_memory(&self) -> usize {
        self.buffer.len() + PageHeader::max_serialized_size(self.schema.data_type())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn total_value_count(&self) -> u64 {
        self.total_value_count
    }

    /// Length of the buffered page records.
    pub fn current_data_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn schema(&self) -> &SeriesSchema {
        &self.schema
    }

    pub fn min_timestamp(&self) -> Option<i64> {
        self.min_timestamp
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }
}

fn page_len(len: usize) -> Result<u32, ChunkError> {
    u32::try_from(len)
        .map_err(|_| ChunkError::PageEncoding(format!("page of {len} bytes is too large")))
}
