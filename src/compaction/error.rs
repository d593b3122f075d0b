use thiserror::Error;

use crate::{chunk::ChunkError, segment::SegmentError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge io error: {0}")]
    Io(#[from] SegmentError),
    #[error("merge file selection failed: {0}")]
    Selection(#[source] SegmentError),
    #[error("merge chunk error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("no schema registered for measurement {0}")]
    UnknownSchema(String),
}
