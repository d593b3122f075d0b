//! Per-segment modification (tombstone) log.
//!
//! The log is a text file next to the segment with one record per line:
//! `DELETION,<device>.<measurement>,<version>,<timestamp>`.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use super::{SegmentError, WithPath};
use crate::{format::FormatError, schema::SeriesPath};

const DELETION_TAG: &str = "DELETION";

/// One recorded change against a series inside a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modification {
    /// Points of `series` with time `<= timestamp` are deleted.
    Deletion {
        /// Target series.
        series: SeriesPath,
        /// Version of the write that issued the deletion.
        version: u64,
        /// Inclusive upper time bound.
        timestamp: i64,
    },
}

impl Modification {
    /// Build a deletion record.
    pub fn deletion(series: SeriesPath, version: u64, timestamp: i64) -> Self {
        Modification::Deletion {
            series,
            version,
            timestamp,
        }
    }

    /// Series the record applies to.
    pub fn series(&self) -> &SeriesPath {
        match self {
            Modification::Deletion { series, .. } => series,
        }
    }

    /// Whether this record removes the point at `timestamp`.
    pub fn covers(&self, timestamp: i64) -> bool {
        match self {
            Modification::Deletion { timestamp: bound, .. } => timestamp <= *bound,
        }
    }

    fn to_line(&self) -> String {
        match self {
            Modification::Deletion {
                series,
                version,
                timestamp,
            } => format!("{DELETION_TAG},{series},{version},{timestamp}"),
        }
    }

    fn parse_line(line: &str) -> Result<Self, FormatError> {
        let mut fields = line.split(',');
        let (Some(tag), Some(series), Some(version), Some(timestamp), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(FormatError::Corrupt("modification record has wrong arity"));
        };
        if tag != DELETION_TAG {
            return Err(FormatError::Corrupt("unknown modification type"));
        }
        let series = series
            .parse()
            .map_err(|_| FormatError::Corrupt("invalid modification series path"))?;
        let version = version
            .parse()
            .map_err(|_| FormatError::Corrupt("invalid modification version"))?;
        let timestamp = timestamp
            .parse()
            .map_err(|_| FormatError::Corrupt("invalid modification timestamp"))?;
        Ok(Modification::deletion(series, version, timestamp))
    }
}

/// Handle on a modification log.
#[derive(Debug)]
pub struct ModificationFile {
    path: PathBuf,
}

impl ModificationFile {
    /// Refer to the log at `path`; nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing log holds no records.
    pub fn read_all(&self) -> Result<Vec<Modification>, SegmentError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_path(&self.path),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_path(&self.path)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(Modification::parse_line(line).with_path(&self.path)?);
        }
        Ok(records)
    }

    /// Append one record and sync it.
    pub fn append(&self, modification: &Modification) -> Result<(), SegmentError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_path(&self.path)?;
        writeln!(file, "{}", modification.to_line()).with_path(&self.path)?;
        file.sync_data().with_path(&self.path)
    }
}
