//! Resumable segment writer.
//!
//! Chunks are appended between [`ChunkSink::start_chunk`] and
//! [`ChunkSink::end_chunk`]. Any failure while a chunk is open rolls the file
//! back to the offset where the chunk started, so a torn chunk never stays in
//! the file. Reopening an unfinished file with [`SegmentWriter::open_resumable`]
//! drops whatever trails the last complete chunk.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use super::{SegmentError, WithPath};
use crate::{
    chunk::ChunkSink,
    format::{
        chunk::{encode_chunk_group_header, ChunkHeader, ChunkIndexEntry},
        index::{decode_index_body, decode_tail, encode_index},
        page::PageHeader,
        ByteReader, FormatError, CHUNK_GROUP_MARKER, CHUNK_MARKER, SEGMENT_HEAD_SIZE,
        SEGMENT_MAGIC, SEGMENT_TAIL_SIZE, SEGMENT_VERSION,
    },
    observability::{log_info, log_warn},
    schema::SeriesPath,
};

#[derive(Debug)]
struct PendingChunk {
    offset: u64,
    data_start: u64,
    header: ChunkHeader,
}

/// Append-only writer over one segment file.
#[derive(Debug)]
pub struct SegmentWriter {
    path: PathBuf,
    file: Option<File>,
    position: u64,
    chunk_index: Vec<ChunkIndexEntry>,
    current_device: Option<String>,
    pending: Option<PendingChunk>,
    sealed: bool,
}

impl SegmentWriter {
    /// Create (or truncate) a segment at `path` and write its head.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SegmentError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_path(&path)?;
        let mut writer = Self::with_file(path, file, 0, Vec::new());
        writer.append(&head_bytes())?;
        Ok(writer)
    }

    /// Open `path` for appending, creating it when missing.
    ///
    /// A sealed file (complete index and tail) is loaded read-only: its chunk
    /// index is available but no further chunks are accepted. An unfinished
    /// file is truncated to its last complete chunk and the in-memory index is
    /// rebuilt from the surviving chunk and page headers.
    ///
    /// Chunk headers do not store a virtual page count, so every recovered
    /// chunk reports `virtual_page_count == page_count`. Virtual pages folded
    /// into those chunks before the interruption are lost.
    pub fn open_resumable(path: impl Into<PathBuf>) -> Result<Self, SegmentError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_path(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).with_path(&path)?;

        if let Some(entries) = sealed_index(&bytes) {
            let mut writer = Self::with_file(path, file, bytes.len() as u64, entries);
            writer.sealed = true;
            writer.file = None;
            return Ok(writer);
        }

        let (valid_len, entries) = recover_chunks(&bytes);
        if valid_len < bytes.len() {
            log_warn!(
                component = "segment",
                event = "segment_tail_truncated",
                path = %path.display(),
                file_len = bytes.len(),
                valid_len,
            );
        }
        file.set_len(valid_len as u64).with_path(&path)?;
        file.seek(SeekFrom::Start(valid_len as u64)).with_path(&path)?;
        let mut writer = Self::with_file(path, file, valid_len as u64, entries);
        if valid_len == 0 {
            writer.append(&head_bytes())?;
        }
        Ok(writer)
    }

    fn with_file(
        path: PathBuf,
        file: File,
        position: u64,
        chunk_index: Vec<ChunkIndexEntry>,
    ) -> Self {
        Self {
            path,
            file: Some(file),
            position,
            chunk_index,
            current_device: None,
            pending: None,
            sealed: false,
        }
    }

    /// Location of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index entries of every complete chunk written or recovered so far.
    pub fn chunk_index(&self) -> &[ChunkIndexEntry] {
        &self.chunk_index
    }

    /// Whether the index and tail have been written.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether further chunks may be appended.
    pub fn can_write(&self) -> bool {
        !self.sealed && self.file.is_some()
    }

    /// Open a chunk group; following chunks belong to `device`.
    pub fn start_chunk_group(&mut self, device: &str) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        if self.pending.is_some() {
            return Err(self.state_error("chunk group started inside an open chunk"));
        }
        let mut buf = Vec::with_capacity(5 + device.len());
        encode_chunk_group_header(device, &mut buf);
        self.append(&buf)?;
        self.current_device = Some(device.to_string());
        Ok(())
    }

    /// Close the current chunk group.
    pub fn end_chunk_group(&mut self) -> Result<(), SegmentError> {
        if self.pending.is_some() {
            return Err(self.state_error("chunk group ended inside an open chunk"));
        }
        self.current_device = None;
        Ok(())
    }

    /// Write the chunk index and tail, sync and release the file handle.
    ///
    /// Returns the final file length.
    pub fn finish(&mut self) -> Result<u64, SegmentError> {
        self.ensure_writable()?;
        if self.pending.is_some() {
            return Err(self.state_error("cannot seal a file with an open chunk"));
        }
        let index = encode_index(&self.chunk_index, self.position);
        self.append(&index)?;
        if let Some(file) = self.file.take() {
            file.sync_all().with_path(&self.path)?;
        }
        self.sealed = true;
        self.current_device = None;
        log_info!(
            component = "segment",
            event = "segment_sealed",
            path = %self.path.display(),
            chunks = self.chunk_index.len(),
            file_len = self.position,
        );
        Ok(self.position)
    }

    /// Sync and release the file handle without sealing. Idempotent.
    ///
    /// An open chunk is rolled back first.
    pub fn close(&mut self) -> Result<(), SegmentError> {
        if self.pending.is_some() {
            self.abort_chunk()?;
        }
        if let Some(file) = self.file.take() {
            file.sync_all().with_path(&self.path)?;
        }
        self.current_device = None;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), SegmentError> {
        if self.sealed {
            return Err(SegmentError::Sealed {
                path: self.path.clone(),
            });
        }
        if self.file.is_none() {
            return Err(SegmentError::Closed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn state_error(&self, reason: &'static str) -> SegmentError {
        SegmentError::State {
            path: self.path.clone(),
            reason,
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), SegmentError> {
        let file = self.file.as_mut().ok_or_else(|| SegmentError::Closed {
            path: self.path.clone(),
        })?;
        file.write_all(bytes).with_path(&self.path)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn truncate_to(&mut self, offset: u64) -> Result<(), SegmentError> {
        let file = self.file.as_mut().ok_or_else(|| SegmentError::Closed {
            path: self.path.clone(),
        })?;
        file.set_len(offset).with_path(&self.path)?;
        file.seek(SeekFrom::Start(offset)).with_path(&self.path)?;
        self.position = offset;
        Ok(())
    }

    fn rollback_after(&mut self, err: SegmentError) -> SegmentError {
        if let Err(rollback) = self.abort_chunk() {
            log_warn!(
                component = "segment",
                event = "chunk_rollback_failed",
                path = %self.path.display(),
                error = %rollback,
            );
        }
        err
    }
}

impl ChunkSink for SegmentWriter {
    fn start_chunk(&mut self, header: ChunkHeader) -> Result<usize, SegmentError> {
        self.ensure_writable()?;
        if self.pending.is_some() {
            return Err(self.state_error("previous chunk was not ended"));
        }
        if self.current_device.is_none() {
            return Err(self.state_error("chunk started outside a chunk group"));
        }
        let mut buf = Vec::with_capacity(header.serialized_size());
        header.encode_into(&mut buf);
        let offset = self.position;
        self.pending = Some(PendingChunk {
            offset,
            data_start: offset + buf.len() as u64,
            header,
        });
        if let Err(err) = self.append(&buf) {
            return Err(self.rollback_after(err));
        }
        Ok(buf.len())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), SegmentError> {
        self.ensure_writable()?;
        if let Err(err) = self.append(bytes) {
            if self.pending.is_some() {
                return Err(self.rollback_after(err));
            }
            return Err(err);
        }
        Ok(())
    }

    fn end_chunk(
        &mut self,
        value_count: u64,
        page_count: u32,
        virtual_page_count: u32,
    ) -> Result<(), SegmentError> {
        let Some(pending) = self.pending.take() else {
            return Err(self.state_error("no chunk to end"));
        };
        let written = self.position - pending.data_start;
        if written != u64::from(pending.header.data_size) {
            self.pending = Some(pending);
            let err = self.state_error("chunk data length differs from its header");
            return Err(self.rollback_after(err));
        }
        let device = self.current_device.clone().unwrap_or_default();
        let header = pending.header;
        self.chunk_index.push(ChunkIndexEntry {
            series: SeriesPath::new(device, header.measurement),
            offset: pending.offset,
            data_type: header.data_type,
            value_count,
            page_count,
            virtual_page_count,
            min_timestamp: header.min_timestamp,
            max_timestamp: header.max_timestamp,
            statistics: header.statistics,
        });
        Ok(())
    }

    fn abort_chunk(&mut self) -> Result<(), SegmentError> {
        if let Some(pending) = self.pending.take() {
            self.truncate_to(pending.offset)?;
        }
        Ok(())
    }
}

fn head_bytes() -> Vec<u8> {
    let mut head = Vec::with_capacity(SEGMENT_HEAD_SIZE);
    head.extend_from_slice(SEGMENT_MAGIC);
    head.push(SEGMENT_VERSION);
    head
}

fn has_valid_head(bytes: &[u8]) -> bool {
    bytes.len() >= SEGMENT_HEAD_SIZE
        && &bytes[..SEGMENT_MAGIC.len()] == SEGMENT_MAGIC
        && bytes[SEGMENT_MAGIC.len()] == SEGMENT_VERSION
}

/// Index of a completely written file, `None` when the file is unfinished.
fn sealed_index(bytes: &[u8]) -> Option<Vec<ChunkIndexEntry>> {
    if !has_valid_head(bytes) || bytes.len() < SEGMENT_HEAD_SIZE + SEGMENT_TAIL_SIZE {
        return None;
    }
    let split = bytes.len() - SEGMENT_TAIL_SIZE;
    let tail = decode_tail(&bytes[split..]).ok()?;
    let start = usize::try_from(tail.index_offset).ok()?;
    if start < SEGMENT_HEAD_SIZE || start > split {
        return None;
    }
    decode_index_body(&bytes[start..split], tail).ok()
}

/// Walk chunk groups and chunks from the head, stopping at the first record
/// that is incomplete or invalid. Returns the length of the valid prefix and
/// the index entries of the complete chunks in it.
fn recover_chunks(bytes: &[u8]) -> (usize, Vec<ChunkIndexEntry>) {
    if !has_valid_head(bytes) {
        return (0, Vec::new());
    }
    let mut valid_len = SEGMENT_HEAD_SIZE;
    let mut device: Option<String> = None;
    let mut entries = Vec::new();
    loop {
        let mut reader = ByteReader::new(&bytes[valid_len..]);
        let record = match reader.u8() {
            Ok(CHUNK_GROUP_MARKER) => reader.string().map(|name| {
                device = Some(name);
            }),
            Ok(CHUNK_MARKER) => match &device {
                Some(name) => scan_chunk(&mut reader, name, valid_len as u64)
                    .map(|entry| entries.push(entry)),
                None => break,
            },
            _ => break,
        };
        if record.is_err() {
            break;
        }
        valid_len = bytes.len() - reader.remaining().len();
    }
    (valid_len, entries)
}

fn scan_chunk(
    reader: &mut ByteReader<'_>,
    device: &str,
    offset: u64,
) -> Result<ChunkIndexEntry, FormatError> {
    let header = ChunkHeader::decode_after_marker(reader)?;
    let data = reader.take(header.data_size as usize)?;
    let mut pages = ByteReader::new(data);
    let mut value_count = 0u64;
    for _ in 0..header.page_count {
        let page = PageHeader::decode_from(&mut pages, header.data_type)?;
        pages.take(page.compressed_size as usize)?;
        value_count += u64::from(page.value_count);
    }
    if !pages.remaining().is_empty() {
        return Err(FormatError::Corrupt("chunk data longer than its pages"));
    }
    Ok(ChunkIndexEntry {
        series: SeriesPath::new(device, header.measurement),
        offset,
        data_type: header.data_type,
        value_count,
        page_count: header.page_count,
        virtual_page_count: header.page_count,
        min_timestamp: header.min_timestamp,
        max_timestamp: header.max_timestamp,
        statistics: header.statistics,
    })
}
