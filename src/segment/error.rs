use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::format::FormatError;

/// Errors raised by segment readers, writers and modification logs.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt segment {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
    #[error("segment handle for {} is closed", .path.display())]
    Closed { path: PathBuf },
    #[error("segment {} is sealed and cannot accept chunks", .path.display())]
    Sealed { path: PathBuf },
    #[error("invalid writer state on {}: {reason}", .path.display())]
    State { path: PathBuf, reason: &'static str },
}

impl SegmentError {
    /// Path of the file the failure relates to.
    pub fn path(&self) -> &Path {
        match self {
            SegmentError::Io { path, .. }
            | SegmentError::Corrupt { path, .. }
            | SegmentError::Closed { path }
            | SegmentError::Sealed { path }
            | SegmentError::State { path, .. } => path,
        }
    }
}

/// Attach the offending path to low-level failures.
pub(crate) trait WithPath<T> {
    fn with_path(self, path: &Path) -> Result<T, SegmentError>;
}

impl<T> WithPath<T> for Result<T, io::Error> {
    fn with_path(self, path: &Path) -> Result<T, SegmentError> {
        self.map_err(|source| SegmentError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<T> WithPath<T> for Result<T, FormatError> {
    fn with_path(self, path: &Path) -> Result<T, SegmentError> {
        self.map_err(|source| SegmentError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}
