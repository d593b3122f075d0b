mod common;

use common::SeriesPoints;
use seriesmerge::{
    compaction::planner::{BudgetedFileSelector, EstimateMode, TrialOutcome, TrialSelector},
    DataType, MaxSeriesSearch, MergeError, MergeOption, MergeResource, MergeSession, SegmentError,
    SegmentFile, SeriesSchema, DEFAULT_MAX_SERIES_NUM,
};

/// Feasible for every `k <= limit`, recording each trial.
struct Oracle {
    limit: usize,
    asked: Vec<(usize, EstimateMode)>,
}

impl Oracle {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            asked: Vec::new(),
        }
    }

    fn distinct_k(&self) -> Vec<usize> {
        let mut ks: Vec<usize> = self.asked.iter().map(|(k, _)| *k).collect();
        ks.dedup();
        ks
    }
}

impl TrialSelector for Oracle {
    fn trial(&mut self, k: usize, mode: EstimateMode) -> Result<TrialOutcome, SegmentError> {
        self.asked.push((k, mode));
        let mut outcome = TrialOutcome::default();
        if mode == EstimateMode::Relaxed && k <= self.limit {
            outcome.seq_files.push(SegmentFile::new(format!("seq-{k}")));
            outcome.unseq_files.push(SegmentFile::new(format!("unseq-{k}")));
            outcome.cost = 100 * k as u64;
        }
        Ok(outcome)
    }
}

#[test]
fn search_finds_the_largest_feasible_count() {
    let mut limits = vec![0, 1, 2, 500, DEFAULT_MAX_SERIES_NUM];
    limits.extend((0..8).map(|_| fastrand::usize(0..=DEFAULT_MAX_SERIES_NUM)));

    for limit in limits {
        let mut oracle = Oracle::new(limit);
        let selection = MaxSeriesSearch::new(DEFAULT_MAX_SERIES_NUM)
            .run(&mut oracle)
            .unwrap();
        assert_eq!(selection.concurrent_series, limit, "limit {limit}");
        assert_eq!(selection.is_empty(), limit == 0);
        if limit > 0 {
            assert_eq!(selection.total_cost, 100 * limit as u64);
            assert_eq!(
                selection.unseq_files,
                vec![SegmentFile::new(format!("unseq-{limit}"))]
            );
        }

        let tried = oracle.distinct_k();
        // ceil(log2(1025)) midpoints at most
        assert!(tried.len() <= 11, "limit {limit}: {} trials", tried.len());
        assert!(tried
            .iter()
            .all(|k| (1..=DEFAULT_MAX_SERIES_NUM).contains(k)));
    }
}

#[test]
fn two_series_budget_settles_on_two() {
    let mut oracle = Oracle::new(2);
    let selection = MaxSeriesSearch::new(DEFAULT_MAX_SERIES_NUM)
        .run(&mut oracle)
        .unwrap();
    assert_eq!(selection.concurrent_series, 2);
    assert!(!selection.unseq_files.is_empty());
    assert!(oracle
        .distinct_k()
        .iter()
        .all(|k| (1..=DEFAULT_MAX_SERIES_NUM).contains(k)));
    assert!(oracle.distinct_k().contains(&2));
    assert!(oracle.distinct_k().contains(&3));
}

/// Three sequence files for `root.d1` covering [0, 99], [100, 199] and
/// [200, 299], and one unsequenced file spanning all of them. Every file holds
/// one chunk for each of four series.
fn overlapping_layout(dir: &std::path::Path) -> (Vec<SegmentFile>, SegmentFile) {
    let series = ["s1", "s2", "s3", "s4"];
    let seq = (0..3)
        .map(|i| {
            let start = i * 100;
            let chunks: Vec<SeriesPoints<'_>> = series
                .iter()
                .map(|m| SeriesPoints::regular("root.d1", m, start, 1, 100))
                .collect();
            common::write_segment(&dir.join(format!("seq-{i}.seg")), &chunks)
        })
        .collect();
    let chunks: Vec<SeriesPoints<'_>> = series
        .iter()
        .map(|m| SeriesPoints::regular("root.d1", m, 50, 3, 100))
        .collect();
    let unseq = common::write_segment(&dir.join("unseq-0.seg"), &chunks);
    (seq, unseq)
}

fn trial_cost(seq: &[SegmentFile], unseq: &SegmentFile, k: usize, mode: EstimateMode) -> u64 {
    let mut resource =
        MergeResource::new(MergeOption::default(), seq, std::slice::from_ref(unseq), 1_000);
    let mut selector = BudgetedFileSelector::new(&mut resource, u64::MAX);
    let outcome = selector.trial(k, mode).unwrap();
    assert_eq!(outcome.seq_files.len(), 3);
    outcome.cost
}

#[test]
fn budget_for_two_series_selects_two_on_real_files() {
    let dir = tempfile::tempdir().unwrap();
    let (seq, unseq) = overlapping_layout(dir.path());

    let strict = trial_cost(&seq, &unseq, 1, EstimateMode::Strict);
    let relaxed_two = trial_cost(&seq, &unseq, 2, EstimateMode::Relaxed);
    let relaxed_three = trial_cost(&seq, &unseq, 3, EstimateMode::Relaxed);
    let budget = relaxed_two + 1;
    assert!(relaxed_three >= budget);
    assert!(strict >= budget);

    let mut session = MergeSession::new(
        MergeOption::default(),
        &seq,
        std::slice::from_ref(&unseq),
        1_000,
    );
    session.register_schemas(
        ["s1", "s2", "s3", "s4"].map(|m| SeriesSchema::new(m, DataType::Int64)),
    );
    let selection = session.select(budget).unwrap();

    assert_eq!(selection.concurrent_series, 2);
    assert_eq!(selection.total_cost, relaxed_two);
    assert_eq!(selection.seq_files, seq);
    assert_eq!(selection.unseq_files, vec![unseq.clone()]);

    let resource = session.resource();
    assert_eq!(resource.seq_files(), seq.as_slice());
    // the unsequenced reader opened during estimation is pruned
    assert_eq!(resource.reader_count(), 3);
    assert!(resource.metrics().selection_trials >= 2);
    session.close().unwrap();
}

#[test]
fn roomy_budget_reaches_the_series_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (seq, unseq) = overlapping_layout(dir.path());
    let option = MergeOption::default().max_series_num(16);
    let mut session = MergeSession::new(option, &seq, std::slice::from_ref(&unseq), 1_000);

    let selection = session.select(u64::MAX).unwrap();
    assert_eq!(selection.concurrent_series, 16);
    assert_eq!(selection.unseq_files.len(), 1);
}

#[test]
fn nothing_fits_a_tiny_budget() {
    let dir = tempfile::tempdir().unwrap();
    let (seq, unseq) = overlapping_layout(dir.path());
    let mut session = MergeSession::new(
        MergeOption::default(),
        &seq,
        std::slice::from_ref(&unseq),
        1_000,
    );

    let selection = session.select(1).unwrap();
    assert!(selection.is_empty());
    assert_eq!(selection.concurrent_series, 0);
    assert!(selection.seq_files.is_empty());
    assert!(session.resource().seq_files().is_empty());
    assert_eq!(session.resource().reader_count(), 0);
}

#[test]
fn missing_sequence_file_fails_selection() {
    let dir = tempfile::tempdir().unwrap();
    let (mut seq, unseq) = overlapping_layout(dir.path());
    std::fs::remove_file(seq[1].path()).unwrap();
    seq.truncate(2);

    let mut session = MergeSession::new(
        MergeOption::default(),
        &seq,
        std::slice::from_ref(&unseq),
        1_000,
    );
    let err = session.select(u64::MAX).unwrap_err();
    match err {
        MergeError::Selection(source) => assert_eq!(source.path(), seq[1].path()),
        other => panic!("unexpected error: {other}"),
    }
}
