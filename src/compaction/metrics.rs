//! Merge resource observability counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of merge resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeMetricsSnapshot {
    /// Segment readers opened.
    pub readers_opened: u64,
    /// Segment readers closed and evicted.
    pub readers_evicted: u64,
    /// Merge writers opened.
    pub writers_opened: u64,
    /// Merge writers closed and evicted.
    pub writers_evicted: u64,
    /// Modification logs loaded.
    pub modification_logs_loaded: u64,
    /// Tombstones handed out.
    pub tombstones_taken: u64,
    /// Selector trials run.
    pub selection_trials: u64,
}

/// Shared merge counters.
#[derive(Debug, Default)]
pub struct MergeMetrics {
    readers_opened: AtomicU64,
    readers_evicted: AtomicU64,
    writers_opened: AtomicU64,
    writers_evicted: AtomicU64,
    modification_logs_loaded: AtomicU64,
    tombstones_taken: AtomicU64,
    selection_trials: AtomicU64,
}

impl MergeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> MergeMetricsSnapshot {
        MergeMetricsSnapshot {
            readers_opened: self.readers_opened.load(Ordering::Relaxed),
            readers_evicted: self.readers_evicted.load(Ordering::Relaxed),
            writers_opened: self.writers_opened.load(Ordering::Relaxed),
            writers_evicted: self.writers_evicted.load(Ordering::Relaxed),
            modification_logs_loaded: self.modification_logs_loaded.load(Ordering::Relaxed),
            tombstones_taken: self.tombstones_taken.load(Ordering::Relaxed),
            selection_trials: self.selection_trials.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_reader_open(&self) {
        add_saturating(&self.readers_opened, 1);
    }

    pub(crate) fn record_reader_evict(&self) {
        add_saturating(&self.readers_evicted, 1);
    }

    pub(crate) fn record_writer_open(&self) {
        add_saturating(&self.writers_opened, 1);
    }

    pub(crate) fn record_writer_evict(&self) {
        add_saturating(&self.writers_evicted, 1);
    }

    pub(crate) fn record_modification_log(&self) {
        add_saturating(&self.modification_logs_loaded, 1);
    }

    pub(crate) fn record_tombstones(&self, taken: usize) {
        add_saturating(&self.tombstones_taken, taken as u64);
    }

    pub(crate) fn record_trial(&self) {
        add_saturating(&self.selection_trials, 1);
    }
}

fn add_saturating(counter: &AtomicU64, delta: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(delta))
    });
}
