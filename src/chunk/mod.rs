//! In-memory staging of merged chunks before they reach a segment writer.

mod buffer;
mod encoder;
mod error;

pub use buffer::{ChunkPageBuffer, ChunkSink};
pub use encoder::ChunkEncoder;
pub use error::ChunkError;
