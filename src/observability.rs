//! Log macros for merge events.
//!
//! Every event is emitted through `tracing` under the `"seriesmerge"` target.
//! Call sites name the emitting part of the crate in `component` (`segment`,
//! `chunk`, `resource`, `selector` or `session`) and the occurrence in
//! `event`, a snake_case name such as `segment_tail_truncated` or
//! `merge_files_selected`. Other fields carry sizes, counts and paths, with
//! paths rendered through `%path.display()`.
//!
//! No subscriber is installed here; the embedding store decides where merge
//! logs go.

pub(crate) const MERGE_TARGET: &str = "seriesmerge";

/// Info-level merge event, for session and selection milestones.
///
/// ```ignore
/// log_info!(
///     component = "resource",
///     event = "merge_writer_created",
///     path = %merge_path.display(),
///     recovered_chunks = writer.chunk_index().len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

/// Recoverable failures, e.g. a torn segment tail or a failed rollback.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::MERGE_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
