mod common;

use std::{sync::Arc, thread};

use seriesmerge::{
    format::statistics::Value,
    segment::{Modification, ModificationFile},
    ChunkSink, DataType, MergeOption, MergeResource, SegmentFile, SeriesPath, SeriesSchema,
};

fn resource_over(files: &[SegmentFile]) -> MergeResource {
    MergeResource::new(MergeOption::default(), files, &[], i64::MAX - 1)
}

fn sample_segment(dir: &std::path::Path, name: &str) -> SegmentFile {
    common::write_segment(
        &dir.join(name),
        &[
            common::SeriesPoints::regular("root.d1", "s1", 0, 1, 5),
            common::SeriesPoints::regular("root.d1", "s2", 0, 1, 5),
        ],
    )
}

#[test]
fn reader_is_opened_once_and_shared() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_segment(dir.path(), "1.seg");
    let mut resource = resource_over(&[file.clone()]);

    let first = resource.get_reader(&file).unwrap();
    let second = resource.get_reader(&file).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(resource.metrics().readers_opened, 1);
    assert_eq!(resource.reader_count(), 1);

    let entries = resource
        .query_chunk_index(&SeriesPath::new("root.d1", "s2"), &file)
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value_count, 5);
    assert_eq!(resource.metrics().readers_opened, 1);
}

#[test]
fn tombstones_are_handed_out_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_segment(dir.path(), "1.seg");
    let s1 = SeriesPath::new("root.d1", "s1");
    let s2 = SeriesPath::new("root.d1", "s2");
    let log = ModificationFile::new(file.mods_path());
    let records = [
        Modification::deletion(s1.clone(), 1, 2),
        Modification::deletion(s2.clone(), 2, 4),
        Modification::deletion(s1.clone(), 3, 3),
    ];
    for record in &records {
        log.append(record).unwrap();
    }
    let mut resource = resource_over(&[file.clone()]);

    let first = resource.tombstones_for(&file, &s1).unwrap();
    assert_eq!(first, vec![records[0].clone(), records[2].clone()]);
    assert!(resource.tombstones_for(&file, &s1).unwrap().is_empty());

    // other series are untouched by the extraction
    assert_eq!(
        resource.tombstones_for(&file, &s2).unwrap(),
        vec![records[1].clone()]
    );
    assert_eq!(resource.metrics().modification_logs_loaded, 1);
    assert_eq!(resource.metrics().tombstones_taken, 3);
}

#[test]
fn file_without_modifications_has_no_tombstones() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_segment(dir.path(), "1.seg");
    let mut resource = resource_over(&[file.clone()]);
    assert!(resource
        .tombstones_for(&file, &SeriesPath::new("root.d1", "s1"))
        .unwrap()
        .is_empty());
}

#[test]
fn merge_writer_is_cached_and_removal_deletes_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_segment(dir.path(), "1.seg");
    let mut resource = resource_over(&[file.clone()]);
    resource.register_schemas([common::int64_schema("s1")]);

    let writer = resource.get_merge_writer(&file).unwrap();
    assert!(Arc::ptr_eq(&writer, &resource.get_merge_writer(&file).unwrap()));
    assert!(file.merge_path().exists());

    let encoder = resource.chunk_encoder_for("s1").unwrap();
    {
        let mut encoder = encoder.lock().unwrap();
        encoder.write(42, Value::Int64(7)).unwrap();
        let mut writer = writer.lock().unwrap();
        writer.start_chunk_group("root.d1").unwrap();
        assert!(encoder.flush_to(&mut *writer).unwrap() > 0);
        assert!(writer.position() > 0);
    }

    resource.remove_writer(&file).unwrap();
    assert!(!file.merge_path().exists());
    assert!(file.path().exists());
    assert_eq!(resource.writer_count(), 0);
    assert!(!writer.lock().unwrap().can_write());
}

#[test]
fn pruning_only_evicts_inactive_readers() {
    let dir = tempfile::tempdir().unwrap();
    let a = sample_segment(dir.path(), "a.seg");
    let b = sample_segment(dir.path(), "b.seg");
    let c = sample_segment(dir.path(), "c.seg");
    let mut resource = resource_over(&[a.clone(), b.clone(), c.clone()]);

    let reader_a = resource.get_reader(&a).unwrap();
    let reader_b = resource.get_reader(&b).unwrap();
    let reader_c = resource.get_reader(&c).unwrap();

    resource.prune_readers_not_in(&[a.clone(), c.clone()]);
    assert_eq!(resource.reader_count(), 2);
    assert!(reader_b.is_closed());
    assert!(!reader_a.is_closed());
    assert!(!reader_c.is_closed());
    assert!(Arc::ptr_eq(&reader_a, &resource.get_reader(&a).unwrap()));

    resource.remove_reader(&c);
    assert!(reader_c.is_closed());
    assert!(c.path().exists());
    assert_eq!(resource.metrics().readers_evicted, 2);
}

#[test]
fn reset_closes_readers_and_writers() {
    let dir = tempfile::tempdir().unwrap();
    let file = sample_segment(dir.path(), "1.seg");
    let mut resource = resource_over(&[file.clone()]);
    resource.register_schemas([common::int64_schema("s1")]);

    let reader = resource.get_reader(&file).unwrap();
    let writer = resource.get_merge_writer(&file).unwrap();
    resource.reset().unwrap();

    assert!(reader.is_closed());
    assert!(!writer.lock().unwrap().can_write());
    assert_eq!(resource.reader_count(), 0);
    assert_eq!(resource.writer_count(), 0);
    assert!(resource.schema("s1").is_none());
    assert_eq!(resource.seq_files(), &[file.clone()]);

    // a reset resource reopens on demand
    let reopened = resource.get_reader(&file).unwrap();
    assert!(!Arc::ptr_eq(&reader, &reopened));
    assert_eq!(resource.metrics().readers_opened, 2);
}

#[test]
fn encoders_are_shared_across_worker_threads() {
    let resource = resource_over(&[]);
    let schemas = [
        SeriesSchema::new("s1", DataType::Int64),
        SeriesSchema::new("s2", DataType::Double),
    ];

    let fetched: Vec<Vec<_>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..64)
                        .map(|i| resource.chunk_encoder(&schemas[i % 2]))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert_eq!(resource.encoder_count(), 2);
    for (idx, schema) in schemas.iter().enumerate() {
        let canonical = resource.chunk_encoder(schema);
        for encoders in &fetched {
            assert!(encoders
                .iter()
                .skip(idx)
                .step_by(2)
                .all(|encoder| Arc::ptr_eq(encoder, &canonical)));
        }
        assert_eq!(canonical.lock().unwrap().schema(), schema);
    }
    assert_eq!(resource.encoder_count(), 2);
}
