use ulid::Ulid;

use super::{
    error::MergeError,
    resource::MergeResource,
    selector::{select_merge_files, MergeFileSelection},
};
use crate::{
    observability::{log_info, log_warn},
    option::MergeOption,
    schema::SeriesSchema,
    segment::{SegmentError, SegmentFile},
};

/// One merge pass over a set of candidate files.
///
/// The session owns its [`MergeResource`]; dropping the session releases every
/// cached file handle.
pub struct MergeSession {
    id: Ulid,
    resource: MergeResource,
}

impl MergeSession {
    pub fn new(
        option: MergeOption,
        seq_candidates: &[SegmentFile],
        unseq_candidates: &[SegmentFile],
        threshold: i64,
    ) -> Self {
        let id = Ulid::new();
        log_info!(
            component = "session",
            event = "merge_session_started",
            session = %id,
            seq_candidates = seq_candidates.len(),
            unseq_candidates = unseq_candidates.len(),
        );
        Self {
            id,
            resource: MergeResource::new(option, seq_candidates, unseq_candidates, threshold),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn register_schemas<I>(&mut self, schemas: I)
    where
        I: IntoIterator<Item = SeriesSchema>,
    {
        self.resource.register_schemas(schemas);
    }

    /// Pick the files of this merge within `memory_budget` bytes.
    pub fn select(&mut self, memory_budget: u64) -> Result<MergeFileSelection, MergeError> {
        let max_series_num = self.resource.option().series_limit();
        let selection = select_merge_files(&mut self.resource, memory_budget, max_series_num);
        if let Err(err) = &selection {
            log_warn!(
                component = "session",
                event = "merge_selection_failed",
                session = %self.id,
                error = %err,
            );
        }
        selection
    }

    pub fn resource(&self) -> &MergeResource {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut MergeResource {
        &mut self.resource
    }

    /// Close every cached reader and writer.
    pub fn close(mut self) -> Result<(), SegmentError> {
        let result = self.resource.reset();
        log_info!(
            component = "session",
            event = "merge_session_closed",
            session = %self.id,
            clean = result.is_ok(),
        );
        result
    }
}
