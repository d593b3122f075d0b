//! Memory-budgeted compaction for a columnar time-series store.
//!
//! Segment files hold chunks of pages per series. A merge rewrites sequence
//! files together with the unsequenced files overlapping them; this crate
//! provides the pieces such a merge runs on: a schema registry, page buffering
//! and chunk encoding, a per-session resource cache, and a file selector that
//! searches for the largest number of concurrently merged series fitting a
//! memory budget.

/// Series schemas and the measurement-keyed registry.
pub mod schema;

/// Byte layouts of pages, chunks and the segment index.
pub mod format;

/// Segment file descriptors, readers, resumable writers and modification logs.
pub mod segment;

/// Page buffering and chunk encoding.
pub mod chunk;

/// Merge sessions, resource cache and file selection.
pub mod compaction;

mod observability;
mod option;

pub use crate::{
    chunk::{ChunkEncoder, ChunkError, ChunkPageBuffer, ChunkSink},
    compaction::{MaxSeriesSearch, MergeError, MergeFileSelection, MergeResource, MergeSession},
    option::{MergeOption, DEFAULT_MAX_SERIES_NUM},
    schema::{DataType, Encoding, SchemaRegistry, SeriesPath, SeriesSchema},
    segment::{SegmentError, SegmentFile},
};
