//! Per-session cache of everything a merge touches.
//!
//! Readers, merge writers and modification logs are opened lazily, once per
//! file, and live until they are removed or the resource is reset. Chunk
//! encoders are interned per schema in a concurrent skip list so merge workers
//! can fetch them through a shared reference.

use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crossbeam_skiplist::SkipMap;

use super::{
    error::MergeError,
    metrics::{MergeMetrics, MergeMetricsSnapshot},
};
use crate::{
    chunk::ChunkEncoder,
    format::chunk::ChunkIndexEntry,
    observability::{log_debug, log_info, log_warn},
    option::MergeOption,
    schema::{SchemaRegistry, SeriesPath, SeriesSchema},
    segment::{
        eligible_files, Modification, ModificationFile, SegmentError, SegmentFile, SegmentReader,
        SegmentWriter, WithPath,
    },
};

/// Merge writer shared between the session and its flush workers.
pub type SharedWriter = Arc<Mutex<SegmentWriter>>;

/// Encoder shared between every series of one schema.
pub type SharedEncoder = Arc<Mutex<ChunkEncoder>>;

pub struct MergeResource {
    option: MergeOption,
    seq_files: Vec<SegmentFile>,
    unseq_files: Vec<SegmentFile>,
    readers: HashMap<PathBuf, Arc<SegmentReader>>,
    writers: HashMap<PathBuf, SharedWriter>,
    modifications: HashMap<PathBuf, Vec<Modification>>,
    schemas: SchemaRegistry,
    encoders: SkipMap<SeriesSchema, SharedEncoder>,
    metrics: Arc<MergeMetrics>,
}

impl MergeResource {
    /// Keep the candidates that are closed, not deleted and have no data at
    /// or beyond `threshold`.
    pub fn new(
        option: MergeOption,
        seq_candidates: &[SegmentFile],
        unseq_candidates: &[SegmentFile],
        threshold: i64,
    ) -> Self {
        let seq_files = eligible_files(seq_candidates, threshold);
        let unseq_files = eligible_files(unseq_candidates, threshold);
        log_info!(
            component = "resource",
            event = "merge_candidates_filtered",
            seq_candidates = seq_candidates.len(),
            seq_eligible = seq_files.len(),
            unseq_candidates = unseq_candidates.len(),
            unseq_eligible = unseq_files.len(),
            threshold,
        );
        Self {
            option,
            seq_files,
            unseq_files,
            readers: HashMap::new(),
            writers: HashMap::new(),
            modifications: HashMap::new(),
            schemas: SchemaRegistry::default(),
            encoders: SkipMap::new(),
            metrics: Arc::new(MergeMetrics::new()),
        }
    }

    pub fn option(&self) -> &MergeOption {
        &self.option
    }

    pub fn seq_files(&self) -> &[SegmentFile] {
        &self.seq_files
    }

    pub fn unseq_files(&self) -> &[SegmentFile] {
        &self.unseq_files
    }

    /// Replace the working set of sequence files.
    pub fn set_seq_files(&mut self, seq_files: Vec<SegmentFile>) {
        self.seq_files = seq_files;
    }

    /// Cached reader of `file`, opening it on first use.
    pub fn get_reader(&mut self, file: &SegmentFile) -> Result<Arc<SegmentReader>, SegmentError> {
        match self.readers.entry(file.path().to_path_buf()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let reader = Arc::new(SegmentReader::open(entry.key())?);
                self.metrics.record_reader_open();
                Ok(Arc::clone(entry.insert(reader)))
            }
        }
    }

    /// Cached writer of the merge temp file of `file`, created or resumed on
    /// first use.
    pub fn get_merge_writer(&mut self, file: &SegmentFile) -> Result<SharedWriter, SegmentError> {
        match self.writers.entry(file.path().to_path_buf()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let merge_path = file.merge_path();
                let writer = SegmentWriter::open_resumable(&merge_path)?;
                self.metrics.record_writer_open();
                log_info!(
                    component = "resource",
                    event = "merge_writer_created",
                    path = %merge_path.display(),
                    recovered_chunks = writer.chunk_index().len(),
                );
                Ok(Arc::clone(entry.insert(Arc::new(Mutex::new(writer)))))
            }
        }
    }

    /// Chunk index entries of `series` in `file`, read from disk on every call.
    pub fn query_chunk_index(
        &mut self,
        series: &SeriesPath,
        file: &SegmentFile,
    ) -> Result<Vec<ChunkIndexEntry>, SegmentError> {
        self.get_reader(file)?.chunk_index(series)
    }

    /// Encoder shared by every series with `schema`.
    pub fn chunk_encoder(&self, schema: &SeriesSchema) -> SharedEncoder {
        let option = &self.option;
        let entry = self.encoders.get_or_insert_with(schema.clone(), || {
            Arc::new(Mutex::new(ChunkEncoder::new(schema.clone(), option)))
        });
        Arc::clone(entry.value())
    }

    /// Encoder for the registered schema of `measurement`.
    pub fn chunk_encoder_for(&self, measurement: &str) -> Result<SharedEncoder, MergeError> {
        let schema = self
            .schemas
            .get(measurement)
            .ok_or_else(|| MergeError::UnknownSchema(measurement.to_string()))?;
        Ok(self.chunk_encoder(schema))
    }

    /// Take the tombstones recorded for `series` in `file`.
    ///
    /// The file's modification log is loaded on first access. Returned records
    /// are removed from the working list, so asking again for the same series
    /// yields nothing.
    pub fn tombstones_for(
        &mut self,
        file: &SegmentFile,
        series: &SeriesPath,
    ) -> Result<Vec<Modification>, SegmentError> {
        let records = match self.modifications.entry(file.path().to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let loaded = ModificationFile::new(file.mods_path()).read_all()?;
                self.metrics.record_modification_log();
                entry.insert(loaded)
            }
        };
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(records)
            .into_iter()
            .partition(|modification| modification.series() == series);
        *records = kept;

        if taken.is_empty() {
            log_debug!(
                component = "resource",
                event = "tombstones_empty",
                path = %file.path().display(),
                series = %series,
            );
        }
        self.metrics.record_tombstones(taken.len());
        Ok(taken)
    }

    /// Register schemas; a later schema for a measurement replaces the earlier one.
    pub fn register_schemas<I>(&mut self, schemas: I)
    where
        I: IntoIterator<Item = SeriesSchema>,
    {
        self.schemas.register(schemas);
    }

    pub fn schema(&self, measurement: &str) -> Option<&SeriesSchema> {
        self.schemas.get(measurement)
    }

    /// Close and evict the merge writer of `file` and delete its temp file.
    pub fn remove_writer(&mut self, file: &SegmentFile) -> Result<(), SegmentError> {
        let Some(writer) = self.writers.remove(file.path()) else {
            return Ok(());
        };
        self.metrics.record_writer_evict();
        let path = {
            let mut guard = lock_writer(&writer);
            guard.close()?;
            guard.path().to_path_buf()
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_path(&path),
        }
    }

    /// Close and evict the reader of `file`; the file itself is kept.
    pub fn remove_reader(&mut self, file: &SegmentFile) {
        if let Some(reader) = self.readers.remove(file.path()) {
            reader.close();
            self.metrics.record_reader_evict();
        }
    }

    /// Close and evict every reader whose file is not in `active`.
    pub fn prune_readers_not_in(&mut self, active: &[SegmentFile]) {
        let active: HashSet<&Path> = active.iter().map(SegmentFile::path).collect();
        let metrics = &self.metrics;
        self.readers.retain(|path, reader| {
            if active.contains(path.as_path()) {
                return true;
            }
            reader.close();
            metrics.record_reader_evict();
            false
        });
    }

    /// Close every reader and writer and clear all caches.
    ///
    /// Caches are cleared even when closing a writer fails; the first failure
    /// is returned.
    pub fn reset(&mut self) -> Result<(), SegmentError> {
        for reader in self.readers.values() {
            reader.close();
            self.metrics.record_reader_evict();
        }
        let mut first_error = None;
        for writer in self.writers.values() {
            self.metrics.record_writer_evict();
            if let Err(err) = lock_writer(writer).close() {
                log_warn!(
                    component = "resource",
                    event = "merge_writer_close_failed",
                    path = %err.path().display(),
                    error = %err,
                );
                first_error.get_or_insert(err);
            }
        }
        self.readers.clear();
        self.writers.clear();
        self.modifications.clear();
        self.schemas.clear();
        self.encoders.clear();
        log_debug!(
            component = "resource",
            event = "merge_resource_reset",
            seq_files = self.seq_files.len(),
        );
        first_error.map_or(Ok(()), Err)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Number of distinct schemas with an interned encoder.
    pub fn encoder_count(&self) -> usize {
        self.encoders.len()
    }

    pub fn metrics(&self) -> MergeMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics_handle(&self) -> &MergeMetrics {
        &self.metrics
    }
}

fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, SegmentWriter> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;

    fn closed(path: PathBuf) -> SegmentFile {
        let mut file = SegmentFile::new(path).with_time_range("root.d1", 0, 10);
        file.close();
        file
    }

    #[test]
    fn construction_filters_both_file_lists() {
        let dir = tempfile::tempdir().unwrap();
        let old = closed(dir.path().join("1.seg"));
        let open = SegmentFile::new(dir.path().join("2.seg")).with_time_range("root.d1", 0, 10);
        let live = closed(dir.path().join("3.seg")).with_time_range("root.d1", 0, 500);

        let resource = MergeResource::new(
            MergeOption::default(),
            &[old.clone(), open, live.clone()],
            &[live, old.clone()],
            100,
        );
        assert_eq!(resource.seq_files(), &[old.clone()]);
        assert_eq!(resource.unseq_files(), &[old]);
    }

    #[test]
    fn encoders_are_interned_per_schema() {
        let resource = MergeResource::new(MergeOption::default(), &[], &[], i64::MAX);
        let a = SeriesSchema::new("s1", DataType::Int32);
        let b = SeriesSchema::new("s2", DataType::Int32);

        let first = resource.chunk_encoder(&a);
        assert!(Arc::ptr_eq(&first, &resource.chunk_encoder(&a)));
        assert!(!Arc::ptr_eq(&first, &resource.chunk_encoder(&b)));
    }

    #[test]
    fn unknown_measurement_has_no_encoder() {
        let mut resource = MergeResource::new(MergeOption::default(), &[], &[], i64::MAX);
        assert!(matches!(
            resource.chunk_encoder_for("s1"),
            Err(MergeError::UnknownSchema(name)) if name == "s1"
        ));

        resource.register_schemas([SeriesSchema::new("s1", DataType::Int32)]);
        resource.register_schemas([SeriesSchema::new("s1", DataType::Double)]);
        assert_eq!(resource.schema("s1").unwrap().data_type(), DataType::Double);
        let encoder = resource.chunk_encoder_for("s1").unwrap();
        assert_eq!(encoder.lock().unwrap().schema().data_type(), DataType::Double);
    }

    #[test]
    fn missing_file_surfaces_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = closed(dir.path().join("absent.seg"));
        let mut resource = MergeResource::new(MergeOption::default(), &[], &[], i64::MAX);

        let err = resource.get_reader(&file).unwrap_err();
        assert!(matches!(err, SegmentError::Io { .. }));
        assert_eq!(err.path(), file.path());
        assert_eq!(resource.reader_count(), 0);
    }

    #[test]
    fn removing_absent_entries_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = closed(dir.path().join("1.seg"));
        let mut resource = MergeResource::new(MergeOption::default(), &[], &[], i64::MAX);
        resource.remove_reader(&file);
        resource.remove_writer(&file).unwrap();
        assert_eq!(resource.metrics(), MergeMetricsSnapshot::default());
    }
}
