use thiserror::Error;

use crate::segment::SegmentError;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("page encoding failed: {0}")]
    PageEncoding(String),
    #[error("chunk write is inconsistent: expected {expected} data bytes, sink advanced {actual}")]
    Consistency { expected: u64, actual: u64 },
    #[error("chunk sink error: {0}")]
    Segment(#[from] SegmentError),
}
