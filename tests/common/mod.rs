//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::path::Path;

use seriesmerge::{
    format::statistics::Value,
    segment::SegmentWriter,
    ChunkEncoder, DataType, MergeOption, SegmentFile, SeriesSchema,
};

/// Points of one series stored in a test segment.
pub struct SeriesPoints<'a> {
    pub device: &'a str,
    pub measurement: &'a str,
    pub points: Vec<(i64, i64)>,
}

impl<'a> SeriesPoints<'a> {
    pub fn new(device: &'a str, measurement: &'a str, points: Vec<(i64, i64)>) -> Self {
        Self {
            device,
            measurement,
            points,
        }
    }

    /// `count` points spaced `step` apart starting at `start`, valued by index.
    pub fn regular(
        device: &'a str,
        measurement: &'a str,
        start: i64,
        step: i64,
        count: usize,
    ) -> Self {
        let points = (0..count as i64).map(|i| (start + i * step, i)).collect();
        Self::new(device, measurement, points)
    }
}

pub fn int64_schema(measurement: &str) -> SeriesSchema {
    SeriesSchema::new(measurement, DataType::Int64)
}

/// Write a sealed segment holding one chunk per entry of `series` and return
/// a closed descriptor with matching time ranges.
pub fn write_segment(path: &Path, series: &[SeriesPoints<'_>]) -> SegmentFile {
    let option = MergeOption::default().page_point_limit(64);
    let mut writer = SegmentWriter::create(path).expect("create segment");
    let mut file = SegmentFile::new(path);
    for entry in series {
        writer
            .start_chunk_group(entry.device)
            .expect("start chunk group");
        let mut encoder = ChunkEncoder::new(int64_schema(entry.measurement), &option);
        for (ts, value) in &entry.points {
            encoder.write(*ts, Value::Int64(*value)).expect("write point");
            file.update_time(entry.device, *ts);
        }
        encoder.flush_to(&mut writer).expect("flush chunk");
        writer.end_chunk_group().expect("end chunk group");
    }
    writer.finish().expect("seal segment");
    file.close();
    file
}
