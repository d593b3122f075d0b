use super::{ChunkError, ChunkPageBuffer, ChunkSink};
use crate::{
    format::{
        page::{encode_page_body, PageDescriptor, PageHeader},
        statistics::{Statistics, Value},
    },
    option::MergeOption,
    schema::SeriesSchema,
};

/// Point-level writer that packs one series into pages and stages them in a
/// [`ChunkPageBuffer`].
///
/// Encoders are shared between every series with the same schema, so each
/// flush leaves the encoder empty.
#[derive(Debug)]
pub struct ChunkEncoder {
    buffer: ChunkPageBuffer,
    page_point_limit: usize,
    page_size_threshold: usize,
    timestamps: Vec<i64>,
    values: Vec<Value>,
    page_raw_size: usize,
    page_statistics: Statistics,
    chunk_statistics: Statistics,
    folded_pages: u32,
}

impl ChunkEncoder {
    pub fn new(schema: SeriesSchema, option: &MergeOption) -> Self {
        let (page_point_limit, page_size_threshold) = option.page_limits();
        let data_type = schema.data_type();
        Self {
            buffer: ChunkPageBuffer::with_zstd_level(schema, option.zstd_level),
            page_point_limit,
            page_size_threshold,
            timestamps: Vec::new(),
            values: Vec::new(),
            page_raw_size: 0,
            page_statistics: Statistics::new(data_type),
            chunk_statistics: Statistics::new(data_type),
            folded_pages: 0,
        }
    }

    pub fn schema(&self) -> &SeriesSchema {
        self.buffer.schema()
    }

    /// Append one point, sealing the open page once it is full.
    pub fn write(&mut self, timestamp: i64, value: Value) -> Result<(), ChunkError> {
        let expected = self.schema().data_type();
        if value.data_type() != expected {
            return Err(ChunkError::PageEncoding(format!(
                "{:?} value written to {} ({expected:?})",
                value.data_type(),
                self.schema().measurement()
            )));
        }
        self.page_statistics
            .update(&value)
            .map_err(|err| ChunkError::PageEncoding(err.to_string()))?;
        self.page_raw_size += 8 + value.encoded_len();
        self.timestamps.push(timestamp);
        self.values.push(value);

        if self.timestamps.len() >= self.page_point_limit
            || self.page_raw_size >= self.page_size_threshold
        {
            self.seal_page()?;
        }
        Ok(())
    }

    /// Copy a page from a source chunk without decoding it.
    pub fn write_unchanged_page(
        &mut self,
        data: &[u8],
        header: PageHeader,
    ) -> Result<(), ChunkError> {
        self.seal_page()?;
        let statistics = header.statistics.clone();
        self.buffer.write_page_with_header(data, header)?;
        self.chunk_statistics
            .merge(&statistics)
            .map_err(|err| ChunkError::PageEncoding(err.to_string()))
    }

    /// Count `pages` empty pages in the virtual page count of the next chunk.
    pub fn fold_virtual_pages(&mut self, pages: u32) {
        self.folded_pages = self.folded_pages.saturating_add(pages);
    }

    /// Seal the open page, write the chunk to `sink` and reset the encoder.
    ///
    /// The encoder is reset whether or not the flush succeeds.
    pub fn flush_to<S>(&mut self, sink: &mut S) -> Result<u64, ChunkError>
    where
        S: ChunkSink + ?Sized,
    {
        let flushed = self.seal_page().and_then(|()| {
            let virtual_pages = self.buffer.page_count().saturating_add(self.folded_pages);
            self.buffer
                .flush_to(sink, &self.chunk_statistics, virtual_pages)
        });
        self.reset();
        flushed
    }

    /// Upper bound of the memory the next flush will need.
    pub fn estimate_max_memory(&self) -> usize {
        let pending = if self.timestamps.is_empty() {
            0
        } else {
            4 + self.page_raw_size + PageHeader::max_serialized_size(self.schema().data_type())
        };
        self.buffer.estimate_max_memory() + pending
    }

    /// Points written since the last flush, including the open page.
    pub fn point_count(&self) -> u64 {
        self.buffer.total_value_count() + self.timestamps.len() as u64
    }

    pub fn page_count(&self) -> u32 {
        self.buffer.page_count()
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
        self.timestamps.clear();
        self.values.clear();
        self.page_raw_size = 0;
        self.page_statistics.clear();
        self.chunk_statistics.clear();
        self.folded_pages = 0;
    }

    fn seal_page(&mut self) -> Result<(), ChunkError> {
        let (Some(first), Some(last)) = (self.timestamps.first(), self.timestamps.last()) else {
            return Ok(());
        };
        let (min_timestamp, max_timestamp) = self
            .timestamps
            .iter()
            .fold((*first, *last), |(min, max), ts| (min.min(*ts), max.max(*ts)));
        let (interval_sum, interval_square_sum) =
            self.timestamps
                .windows(2)
                .fold((0i64, 0i64), |(sum, squares), pair| {
                    let gap = pair[1].wrapping_sub(pair[0]);
                    (sum.wrapping_add(gap), squares.wrapping_add(gap.wrapping_mul(gap)))
                });

        let body = encode_page_body(self.schema().encoding(), &self.timestamps, &self.values);
        let raw_size = self.timestamps.len() * 8
            + self.values.iter().map(Value::encoded_len).sum::<usize>();
        let descriptor = PageDescriptor {
            value_count: self.timestamps.len() as u32,
            statistics: self.page_statistics.clone(),
            max_timestamp,
            min_timestamp,
            compression_ratio: (raw_size * 100 / body.len().max(1)) as i32,
            time_interval_sum: interval_sum,
            time_interval_square_sum: interval_square_sum,
        };
        self.buffer.write_page(&body, descriptor)?;
        self.chunk_statistics
            .merge(&self.page_statistics)
            .map_err(|err| ChunkError::PageEncoding(err.to_string()))?;

        self.timestamps.clear();
        self.values.clear();
        self.page_raw_size = 0;
        self.page_statistics.clear();
        Ok(())
    }
}
