use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use super::{SegmentError, WithPath};
use crate::{
    format::{
        chunk::{ChunkHeader, ChunkIndexEntry},
        codec::Codec,
        index::{decode_index_body, decode_tail, IndexTail},
        page::{decode_page_body, PageHeader},
        statistics::Value,
        ByteReader, FormatError, SEGMENT_HEAD_SIZE, SEGMENT_MAGIC, SEGMENT_TAIL_SIZE,
        SEGMENT_VERSION,
    },
    schema::SeriesPath,
};

const HEADER_WINDOW: usize = 256;

/// Shared read handle over one sealed segment file.
///
/// The handle is guarded by a mutex so a single `Arc<SegmentReader>` can be
/// handed to several merge tasks.
#[derive(Debug)]
pub struct SegmentReader {
    path: PathBuf,
    file: Mutex<Option<File>>,
    index_offset: u64,
    file_len: u64,
}

impl SegmentReader {
    /// Open `path` and validate its head and tail.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SegmentError> {
        let path = path.into();
        let mut file = File::open(&path).with_path(&path)?;
        let file_len = file.metadata().with_path(&path)?.len();
        if file_len < (SEGMENT_HEAD_SIZE + SEGMENT_TAIL_SIZE) as u64 {
            return Err(FormatError::Corrupt("segment shorter than head and tail")).with_path(&path);
        }

        let mut head = [0u8; SEGMENT_HEAD_SIZE];
        file.read_exact(&mut head).with_path(&path)?;
        if &head[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
            return Err(FormatError::Corrupt("segment head magic mismatch")).with_path(&path);
        }
        if head[SEGMENT_MAGIC.len()] != SEGMENT_VERSION {
            return Err(FormatError::Corrupt("unsupported segment version")).with_path(&path);
        }

        let tail = read_tail(&mut file, file_len).with_path(&path)?;
        let data_end = file_len - SEGMENT_TAIL_SIZE as u64;
        if tail.index_offset < SEGMENT_HEAD_SIZE as u64 || tail.index_offset > data_end {
            return Err(FormatError::Corrupt("index offset out of range")).with_path(&path);
        }

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            index_offset: tail.index_offset,
            file_len,
        })
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`SegmentReader::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Every chunk index entry in file order.
    ///
    /// The index is read from disk and verified on each call.
    pub fn all_chunk_index(&self) -> Result<Vec<ChunkIndexEntry>, SegmentError> {
        let mut guard = self.lock();
        let file = guard.as_mut().ok_or_else(|| self.closed())?;
        let body_len = self.file_len - SEGMENT_TAIL_SIZE as u64 - self.index_offset;
        let body = read_at(file, self.index_offset, body_len as usize).with_path(&self.path)?;
        let tail = read_tail(file, self.file_len).with_path(&self.path)?;
        decode_index_body(&body, tail).with_path(&self.path)
    }

    /// Index entries of the chunks stored for `series`, in file order.
    pub fn chunk_index(&self, series: &SeriesPath) -> Result<Vec<ChunkIndexEntry>, SegmentError> {
        let mut entries = self.all_chunk_index()?;
        entries.retain(|entry| &entry.series == series);
        Ok(entries)
    }

    /// Load the chunk located by `entry`.
    pub fn read_chunk(&self, entry: &ChunkIndexEntry) -> Result<Chunk, SegmentError> {
        let mut guard = self.lock();
        let file = guard.as_mut().ok_or_else(|| self.closed())?;
        if entry.offset < SEGMENT_HEAD_SIZE as u64 || entry.offset >= self.index_offset {
            return Err(FormatError::Corrupt("chunk offset out of range")).with_path(&self.path);
        }

        let available = (self.index_offset - entry.offset) as usize;
        let mut window = HEADER_WINDOW.min(available);
        let (header, header_len) = loop {
            let bytes = read_at(file, entry.offset, window).with_path(&self.path)?;
            let mut reader = ByteReader::new(&bytes);
            match ChunkHeader::decode_from(&mut reader) {
                Ok(header) => break (header, window - reader.remaining().len()),
                Err(_) if window < available => window = (window * 2).min(available),
                Err(err) => return Err(err).with_path(&self.path),
            }
        };

        let data_offset = entry.offset + header_len as u64;
        if data_offset + u64::from(header.data_size) > self.index_offset {
            return Err(FormatError::Corrupt("chunk data overruns index")).with_path(&self.path);
        }
        let data = read_at(file, data_offset, header.data_size as usize).with_path(&self.path)?;
        Ok(Chunk { header, data })
    }

    /// Release the file handle. Idempotent.
    pub fn close(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> SegmentError {
        SegmentError::Closed {
            path: self.path.clone(),
        }
    }
}

fn read_at(file: &mut File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_tail(file: &mut File, file_len: u64) -> Result<IndexTail, FormatError> {
    let tail = read_at(file, file_len - SEGMENT_TAIL_SIZE as u64, SEGMENT_TAIL_SIZE)
        .map_err(|_| FormatError::Corrupt("unreadable segment tail"))?;
    decode_tail(&tail)
}

/// One chunk as stored: its header and the raw page records.
#[derive(Clone, Debug)]
pub struct Chunk {
    header: ChunkHeader,
    data: Vec<u8>,
}

impl Chunk {
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Raw `[page header][page body]` records.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Page headers paired with their decompressed bodies.
    pub fn pages(&self) -> Result<Vec<(PageHeader, Vec<u8>)>, FormatError> {
        let codec = Codec::new(self.header.compression);
        let mut reader = ByteReader::new(&self.data);
        // page_count is unverified on disk
        let mut pages = Vec::with_capacity((self.header.page_count as usize).min(1024));
        for _ in 0..self.header.page_count {
            let page = PageHeader::decode_from(&mut reader, self.header.data_type)?;
            let stored = reader.take(page.compressed_size as usize)?;
            let body = codec.decompress(stored, page.uncompressed_size as usize)?;
            pages.push((page, body));
        }
        if !reader.remaining().is_empty() {
            return Err(FormatError::Corrupt("chunk data longer than its pages"));
        }
        Ok(pages)
    }

    /// Every point of the chunk in write order.
    pub fn points(&self) -> Result<Vec<(i64, Value)>, FormatError> {
        let mut points = Vec::new();
        for (_, body) in self.pages()? {
            points.extend(decode_page_body(
                &body,
                self.header.encoding,
                self.header.data_type,
            )?);
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{codec::CompressionKind, statistics::Statistics},
        schema::{DataType, Encoding},
        segment::SegmentWriter,
    };

    #[test]
    fn unsealed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.seg");
        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.start_chunk_group("root.d1").unwrap();
        writer.close().unwrap();

        let err = SegmentReader::open(&path).unwrap_err();
        assert!(matches!(err, SegmentError::Corrupt { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.seg");
        assert!(matches!(
            SegmentReader::open(&path),
            Err(SegmentError::Io { .. })
        ));
    }

    #[test]
    fn closed_reader_refuses_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.seg");
        SegmentWriter::create(&path).unwrap().finish().unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        assert!(reader.all_chunk_index().unwrap().is_empty());
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(
            reader.all_chunk_index(),
            Err(SegmentError::Closed { .. })
        ));
    }

    #[test]
    fn inflated_page_count_is_corrupt() {
        let chunk = Chunk {
            header: ChunkHeader {
                measurement: "s1".to_string(),
                data_size: 0,
                data_type: DataType::Int64,
                compression: CompressionKind::Zstd,
                encoding: Encoding::Plain,
                page_count: u32::MAX,
                statistics: Statistics::new(DataType::Int64),
                max_timestamp: 0,
                min_timestamp: 0,
            },
            data: Vec::new(),
        };
        assert!(matches!(chunk.pages(), Err(FormatError::Corrupt(_))));
        assert!(chunk.points().is_err());
    }
}
