//! Merge planning and the per-session resources a merge runs on.
//!
//! A [`MergeSession`] filters candidate segment files, caches readers and
//! merge writers for them, and selects the files of the next merge under a
//! memory budget.

mod error;
/// Merge resource counters.
pub mod metrics;
/// Single-pass file selection and its cost model.
pub mod planner;
mod resource;
/// Series-count search over the planner.
pub mod selector;
mod session;

pub use error::MergeError;
pub use resource::{MergeResource, SharedEncoder, SharedWriter};
pub use selector::{select_merge_files, MaxSeriesSearch, MergeFileSelection};
pub use session::MergeSession;
