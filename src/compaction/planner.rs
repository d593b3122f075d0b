//! Single-pass merge file selection under a memory budget.
//!
//! A trial walks the unsequenced files in order. For each one it collects the
//! sequence files whose per-device time ranges it overlaps, estimates the
//! memory needed to merge them together and keeps the group when the running
//! total stays below the budget.

use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
};

use super::resource::MergeResource;
use crate::segment::{SegmentError, SegmentFile};

/// How a trial bounds the memory of one unsequenced file and its sequence files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimateMode {
    /// Whole unsequenced file sizes and whole sequence metadata; independent
    /// of the concurrent-merge series count.
    Strict,
    /// Per-series estimates scaled by the concurrent-merge series count,
    /// capped by the strict figures.
    Relaxed,
}

/// Files picked by one trial and their estimated memory cost.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrialOutcome {
    pub seq_files: Vec<SegmentFile>,
    pub unseq_files: Vec<SegmentFile>,
    pub cost: u64,
}

impl TrialOutcome {
    /// A trial is feasible when it selected at least one unsequenced file.
    pub fn is_feasible(&self) -> bool {
        !self.unseq_files.is_empty()
    }
}

/// Selection primitive driven by the series-count search.
///
/// Implementations must be monotone: if a trial is feasible at `k` it must
/// also be feasible at every smaller `k` in the same mode.
pub trait TrialSelector {
    fn trial(
        &mut self,
        concurrent_series: usize,
        mode: EstimateMode,
    ) -> Result<TrialOutcome, SegmentError>;
}

/// Chunk counts of one file: all chunks and those of its busiest series.
#[derive(Clone, Copy, Debug)]
struct ChunkShare {
    total: u64,
    largest: u64,
}

/// [`TrialSelector`] estimating costs from the files of a [`MergeResource`].
pub struct BudgetedFileSelector<'a> {
    resource: &'a mut MergeResource,
    budget: u64,
    metadata_costs: HashMap<PathBuf, u64>,
    chunk_shares: HashMap<PathBuf, ChunkShare>,
}

impl<'a> BudgetedFileSelector<'a> {
    pub fn new(resource: &'a mut MergeResource, budget: u64) -> Self {
        Self {
            resource,
            budget,
            metadata_costs: HashMap::new(),
            chunk_shares: HashMap::new(),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Memory held by the chunk index of `file` once loaded.
    fn metadata_cost(&mut self, file: &SegmentFile) -> Result<u64, SegmentError> {
        if let Some(cost) = self.metadata_costs.get(file.path()) {
            return Ok(*cost);
        }
        let entries = self.resource.get_reader(file)?.all_chunk_index()?;
        let cost = entries
            .iter()
            .map(|entry| entry.estimated_size() as u64)
            .sum();
        self.metadata_costs.insert(file.path().to_path_buf(), cost);
        Ok(cost)
    }

    fn chunk_share(&mut self, file: &SegmentFile) -> Result<ChunkShare, SegmentError> {
        if let Some(share) = self.chunk_shares.get(file.path()) {
            return Ok(*share);
        }
        let entries = self.resource.get_reader(file)?.all_chunk_index()?;
        let mut per_series = HashMap::new();
        for entry in &entries {
            *per_series.entry(entry.series.clone()).or_insert(0u64) += 1;
        }
        let share = ChunkShare {
            total: entries.len() as u64,
            largest: per_series.values().copied().max().unwrap_or(0),
        };
        self.chunk_shares.insert(file.path().to_path_buf(), share);
        Ok(share)
    }

    /// `k` times the share of `whole` taken by the busiest series, capped at `whole`.
    fn scaled(&mut self, file: &SegmentFile, whole: u64, k: usize) -> Result<u64, SegmentError> {
        let share = self.chunk_share(file)?;
        let single = if share.total == 0 {
            0
        } else {
            whole.saturating_mul(share.largest) / share.total
        };
        Ok(single.saturating_mul(k as u64).min(whole))
    }

    fn unseq_cost(
        &mut self,
        file: &SegmentFile,
        mode: EstimateMode,
        k: usize,
    ) -> Result<u64, SegmentError> {
        let size = file.file_size()?;
        match mode {
            EstimateMode::Strict => Ok(size),
            EstimateMode::Relaxed => self.scaled(file, size, k),
        }
    }

    fn seq_cost(
        &mut self,
        file: &SegmentFile,
        mode: EstimateMode,
        k: usize,
    ) -> Result<u64, SegmentError> {
        let metadata = self.metadata_cost(file)?;
        match mode {
            EstimateMode::Strict => Ok(metadata),
            EstimateMode::Relaxed => self.scaled(file, metadata, k),
        }
    }

    /// Indexes of the unselected sequence files `unseq` overlaps.
    fn overlapped_seq_files(&self, unseq: &SegmentFile, selected: &[bool]) -> BTreeSet<usize> {
        let seq_files = self.resource.seq_files();
        let already = selected.iter().filter(|s| **s).count();
        let mut overlapped = BTreeSet::new();
        for device in unseq.devices() {
            let (Some(unseq_start), Some(unseq_end)) =
                (unseq.start_time(device), unseq.end_time(device))
            else {
                continue;
            };
            for (idx, seq) in seq_files.iter().enumerate() {
                if selected[idx] {
                    continue;
                }
                let Some(seq_end) = seq.end_time(device) else {
                    continue;
                };
                if unseq_end <= seq_end {
                    // later sequence files only hold newer data of this device
                    overlapped.insert(idx);
                    break;
                } else if unseq_start <= seq_end {
                    overlapped.insert(idx);
                }
            }
            if overlapped.len() + already == seq_files.len() {
                break;
            }
        }
        overlapped
    }

    /// Cost of merging `unseq` with `seq_group`. Only one sequence file is read
    /// at a time, so only the largest read cost counts, but every rewritten
    /// file carries its metadata.
    fn group_cost(
        &mut self,
        unseq: &SegmentFile,
        seq_group: &[SegmentFile],
        mode: EstimateMode,
        k: usize,
        max_seq_cost: &mut u64,
    ) -> Result<u64, SegmentError> {
        let mut cost = self.unseq_cost(unseq, mode, k)?;
        for seq in seq_group {
            let read_cost = self.seq_cost(seq, mode, k)?;
            if read_cost > *max_seq_cost {
                cost += read_cost - *max_seq_cost;
                *max_seq_cost = read_cost;
            }
            cost += self.metadata_cost(seq)?;
        }
        Ok(cost)
    }
}

impl TrialSelector for BudgetedFileSelector<'_> {
    fn trial(&mut self, k: usize, mode: EstimateMode) -> Result<TrialOutcome, SegmentError> {
        self.resource.metrics_handle().record_trial();
        let unseq_files = self.resource.unseq_files().to_vec();
        let seq_files = self.resource.seq_files().to_vec();

        let mut selected = vec![false; seq_files.len()];
        let mut outcome = TrialOutcome::default();
        let mut max_seq_cost = 0u64;

        for unseq in &unseq_files {
            let group = self.overlapped_seq_files(unseq, &selected);
            let group_files: Vec<SegmentFile> =
                group.iter().map(|idx| seq_files[*idx].clone()).collect();

            let mut candidate_max = max_seq_cost;
            let cost = self.group_cost(unseq, &group_files, mode, k, &mut candidate_max)?;
            if outcome.cost.saturating_add(cost) < self.budget {
                outcome.unseq_files.push(unseq.clone());
                max_seq_cost = candidate_max;
                for idx in group {
                    selected[idx] = true;
                }
                outcome.cost += cost;
            }
        }

        outcome.seq_files = seq_files
            .into_iter()
            .zip(selected)
            .filter_map(|(file, picked)| picked.then_some(file))
            .collect();
        Ok(outcome)
    }
}
