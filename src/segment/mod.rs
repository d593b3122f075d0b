//! Segment file descriptors and the handles used to read and rewrite them.

mod error;
pub mod modification;
pub mod reader;
pub mod writer;

use std::{
    collections::HashMap,
    ffi::OsString,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};

pub use error::SegmentError;
pub(crate) use error::WithPath;
pub use modification::{Modification, ModificationFile};
pub use reader::{Chunk, SegmentReader};
pub use writer::SegmentWriter;

/// Suffix appended to a sequence file path to name its merge temp file.
pub const MERGE_SUFFIX: &str = ".merge";

/// Suffix appended to a segment path to name its modification log.
pub const MODS_SUFFIX: &str = ".mods";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Descriptor of one on-disk segment file.
///
/// Descriptors compare and hash by path; the flags and per-device time ranges
/// are bookkeeping maintained by the write path.
#[derive(Clone, Debug)]
pub struct SegmentFile {
    path: PathBuf,
    closed: bool,
    deleted: bool,
    start_times: HashMap<String, i64>,
    end_times: HashMap<String, i64>,
}

impl SegmentFile {
    /// Describe an open, empty segment at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            closed: false,
            deleted: false,
            start_times: HashMap::new(),
            end_times: HashMap::new(),
        }
    }

    /// Widen the time range recorded for `device` to include `timestamp`.
    pub fn update_time(&mut self, device: &str, timestamp: i64) {
        self.start_times
            .entry(device.to_string())
            .and_modify(|start| *start = (*start).min(timestamp))
            .or_insert(timestamp);
        self.end_times
            .entry(device.to_string())
            .and_modify(|end| *end = (*end).max(timestamp))
            .or_insert(timestamp);
    }

    /// Builder-style variant of [`SegmentFile::update_time`].
    pub fn with_time_range(mut self, device: &str, start: i64, end: i64) -> Self {
        self.update_time(device, start);
        self.update_time(device, end);
        self
    }

    /// Mark the file as no longer receiving writes.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Mark the file as deleted.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Location of the segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the merge temp file for this segment.
    pub fn merge_path(&self) -> PathBuf {
        with_suffix(&self.path, MERGE_SUFFIX)
    }

    /// Location of the modification log for this segment.
    pub fn mods_path(&self) -> PathBuf {
        with_suffix(&self.path, MODS_SUFFIX)
    }

    /// Whether the write path has closed the file.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the file has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Devices with a recorded time range.
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.start_times.keys().map(String::as_str)
    }

    /// Earliest timestamp recorded for `device`.
    pub fn start_time(&self, device: &str) -> Option<i64> {
        self.start_times.get(device).copied()
    }

    /// Latest timestamp recorded for `device`.
    pub fn end_time(&self, device: &str) -> Option<i64> {
        self.end_times.get(device).copied()
    }

    /// Whether the file may still hold data at or beyond `threshold`.
    ///
    /// `i64::MAX` means "no bound" and always reports a live file.
    pub fn still_lives(&self, threshold: i64) -> bool {
        threshold == i64::MAX || self.end_times.values().any(|end| *end >= threshold)
    }

    /// `closed ∧ ¬deleted ∧ ¬still_lives(threshold)`.
    pub fn is_mergeable(&self, threshold: i64) -> bool {
        self.closed && !self.deleted && !self.still_lives(threshold)
    }

    /// Current on-disk size.
    pub fn file_size(&self) -> Result<u64, SegmentError> {
        Ok(std::fs::metadata(&self.path).with_path(&self.path)?.len())
    }
}

impl PartialEq for SegmentFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for SegmentFile {}

impl Hash for SegmentFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Keep the candidates that may be merged at `threshold`, in input order.
pub fn eligible_files<'a, I>(candidates: I, threshold: i64) -> Vec<SegmentFile>
where
    I: IntoIterator<Item = &'a SegmentFile>,
{
    candidates
        .into_iter()
        .filter(|file| file.is_mergeable(threshold))
        .cloned()
        .collect()
}
