//! Binary search for the largest concurrent-merge series count whose file
//! selection fits the memory budget.

use std::time::Instant;

use super::{
    error::MergeError,
    planner::{BudgetedFileSelector, EstimateMode, TrialOutcome, TrialSelector},
    resource::MergeResource,
};
use crate::{
    observability::{log_debug, log_info},
    segment::{SegmentError, SegmentFile},
};

/// Outcome of a merge file selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeFileSelection {
    pub seq_files: Vec<SegmentFile>,
    pub unseq_files: Vec<SegmentFile>,
    /// Number of series that may be merged at the same time.
    pub concurrent_series: usize,
    /// Estimated memory cost of the selection.
    pub total_cost: u64,
}

impl MergeFileSelection {
    /// `true` when there is nothing to merge.
    pub fn is_empty(&self) -> bool {
        self.unseq_files.is_empty()
    }
}

/// Best feasible trial seen so far.
#[derive(Debug, Default)]
struct BestTrial {
    concurrent_series: usize,
    outcome: TrialOutcome,
}

impl BestTrial {
    fn into_selection(self) -> MergeFileSelection {
        MergeFileSelection {
            seq_files: self.outcome.seq_files,
            unseq_files: self.outcome.unseq_files,
            concurrent_series: self.concurrent_series,
            total_cost: self.outcome.cost,
        }
    }
}

/// Search over `k` in `[0, max_series_num]`.
///
/// Feasibility must be monotone in `k`; a non-monotone cost model can make the
/// search settle on a feasible but not maximal `k`.
#[derive(Clone, Copy, Debug)]
pub struct MaxSeriesSearch {
    max_series_num: usize,
}

impl MaxSeriesSearch {
    pub fn new(max_series_num: usize) -> Self {
        Self { max_series_num }
    }

    /// Run the search. Trial values of `k` always lie in `[1, max_series_num]`.
    ///
    /// With `usize::MAX` as the bound the largest reachable answer is
    /// `usize::MAX - 1`.
    pub fn run<T>(&self, selector: &mut T) -> Result<MergeFileSelection, SegmentError>
    where
        T: TrialSelector + ?Sized,
    {
        let mut lower = 0usize;
        let mut upper = self.max_series_num.saturating_add(1);
        let mut best = BestTrial::default();
        loop {
            let mid = lower + (upper - lower) / 2;
            if mid == lower {
                break;
            }
            match trial_at(selector, mid)? {
                Some(outcome) => {
                    best = BestTrial {
                        concurrent_series: mid,
                        outcome,
                    };
                    lower = mid;
                }
                None => upper = mid,
            }
        }
        debug_assert_eq!(best.concurrent_series, lower);
        Ok(best.into_selection())
    }
}

/// Strict estimate first; fall back to the relaxed one only when the strict
/// trial picked nothing.
fn trial_at<T>(selector: &mut T, k: usize) -> Result<Option<TrialOutcome>, SegmentError>
where
    T: TrialSelector + ?Sized,
{
    let strict = selector.trial(k, EstimateMode::Strict)?;
    let outcome = if strict.is_feasible() {
        strict
    } else {
        selector.trial(k, EstimateMode::Relaxed)?
    };
    log_debug!(
        component = "selector",
        event = "merge_trial",
        concurrent_series = k,
        feasible = outcome.is_feasible(),
        cost = outcome.cost,
    );
    Ok(outcome.is_feasible().then_some(outcome))
}

/// Select the files of the next merge from `resource` within `budget`.
///
/// On return the resource's sequence files are narrowed to the selected ones
/// and readers of every other file are closed. Narrowing is not undone when a
/// later step fails.
pub fn select_merge_files(
    resource: &mut MergeResource,
    budget: u64,
    max_series_num: usize,
) -> Result<MergeFileSelection, MergeError> {
    let started = Instant::now();
    log_info!(
        component = "selector",
        event = "merge_selection_started",
        seq_files = resource.seq_files().len(),
        unseq_files = resource.unseq_files().len(),
        budget,
    );

    let selection = {
        let mut selector = BudgetedFileSelector::new(resource, budget);
        MaxSeriesSearch::new(max_series_num)
            .run(&mut selector)
            .map_err(MergeError::Selection)?
    };
    resource.set_seq_files(selection.seq_files.clone());
    resource.prune_readers_not_in(&selection.seq_files);

    if selection.is_empty() {
        log_info!(
            component = "selector",
            event = "merge_candidates_not_found",
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
    } else {
        log_info!(
            component = "selector",
            event = "merge_files_selected",
            seq_files = selection.seq_files.len(),
            unseq_files = selection.unseq_files.len(),
            total_cost = selection.total_cost,
            concurrent_series = selection.concurrent_series,
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
    }
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feasible up to `limit`, recording every trial.
    struct Threshold {
        limit: usize,
        strict_limit: usize,
        asked: Vec<(usize, EstimateMode)>,
    }

    impl TrialSelector for Threshold {
        fn trial(&mut self, k: usize, mode: EstimateMode) -> Result<TrialOutcome, SegmentError> {
            self.asked.push((k, mode));
            let limit = match mode {
                EstimateMode::Strict => self.strict_limit,
                EstimateMode::Relaxed => self.limit,
            };
            let mut outcome = TrialOutcome::default();
            if k <= limit {
                outcome.unseq_files.push(SegmentFile::new(format!("unseq-{k}")));
                outcome.cost = k as u64;
            }
            Ok(outcome)
        }
    }

    #[test]
    fn relaxed_trial_runs_only_after_empty_strict_trial() {
        let mut oracle = Threshold {
            limit: 8,
            strict_limit: 5,
            asked: Vec::new(),
        };
        let selection = MaxSeriesSearch::new(8).run(&mut oracle).unwrap();
        assert_eq!(selection.concurrent_series, 8);
        for window in oracle.asked.windows(2) {
            if window[1].1 == EstimateMode::Relaxed {
                assert_eq!(window[0], (window[1].0, EstimateMode::Strict));
            }
        }
        assert!(oracle
            .asked
            .iter()
            .filter(|(k, _)| *k <= 5)
            .all(|(_, mode)| *mode == EstimateMode::Strict));
    }

    #[test]
    fn unbounded_series_limit_does_not_overflow() {
        let mut oracle = Threshold {
            limit: 5,
            strict_limit: 0,
            asked: Vec::new(),
        };
        let selection = MaxSeriesSearch::new(usize::MAX).run(&mut oracle).unwrap();
        assert_eq!(selection.concurrent_series, 5);
        assert!(oracle.asked.len() <= 2 * usize::BITS as usize);

        let mut everything = Threshold {
            limit: usize::MAX,
            strict_limit: usize::MAX,
            asked: Vec::new(),
        };
        let selection = MaxSeriesSearch::new(usize::MAX).run(&mut everything).unwrap();
        assert_eq!(selection.concurrent_series, usize::MAX - 1);
    }

    #[test]
    fn best_trial_carries_its_own_files() {
        let mut oracle = Threshold {
            limit: 5,
            strict_limit: 0,
            asked: Vec::new(),
        };
        let selection = MaxSeriesSearch::new(16).run(&mut oracle).unwrap();
        assert_eq!(selection.concurrent_series, 5);
        assert_eq!(selection.total_cost, 5);
        assert_eq!(selection.unseq_files, vec![SegmentFile::new("unseq-5")]);
    }

    struct Failing;

    impl TrialSelector for Failing {
        fn trial(&mut self, _: usize, _: EstimateMode) -> Result<TrialOutcome, SegmentError> {
            Err(SegmentError::Closed {
                path: "broken.seg".into(),
            })
        }
    }

    #[test]
    fn trial_errors_abort_the_search() {
        assert!(matches!(
            MaxSeriesSearch::new(4).run(&mut Failing),
            Err(SegmentError::Closed { .. })
        ));
    }
}
