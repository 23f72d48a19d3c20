//! Coverage aggregation
//!
//! Merges execution records into a per-file coverage report.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::lcov::{LcovError, Tracefile};
use crate::models::{Counter, CounterCoverage, Probe, TestExecutionRecord};

/// Module name used for files without a parent directory
pub const ROOT_MODULE: &str = "(root)";

/// Fatal errors while reading instrumentation data
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("execution data not found at {0}; run the tests first")]
    MissingExecutionData(PathBuf),

    #[error("failed to read execution data {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt execution data {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported execution data version '{found}' in {path}")]
    UnsupportedVersion { path: PathBuf, found: String },

    #[error("invalid baseline tracefile {path}: {source}")]
    Baseline {
        path: PathBuf,
        #[source]
        source: LcovError,
    },
}

/// Coverage counters for one file (or a rollup of files)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub lines: CounterCoverage,
    pub branches: CounterCoverage,
}

impl FileCoverage {
    pub fn counter(&self, counter: Counter) -> CounterCoverage {
        match counter {
            Counter::Line => self.lines,
            Counter::Branch => self.branches,
        }
    }

    pub fn add(&mut self, other: &FileCoverage) {
        self.lines.add(other.lines);
        self.branches.add(other.branches);
    }
}

/// Coverage report keyed by source file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Project-wide totals
    pub fn totals(&self) -> FileCoverage {
        let mut totals = FileCoverage::default();
        for coverage in self.files.values() {
            totals.add(coverage);
        }
        totals
    }

    /// Rollup of files by module (parent directory)
    pub fn modules(&self) -> BTreeMap<String, FileCoverage> {
        let mut modules: BTreeMap<String, FileCoverage> = BTreeMap::new();
        for (file, coverage) in &self.files {
            modules.entry(module_of(file)).or_default().add(coverage);
        }
        modules
    }

    /// Files that belong to a module
    pub fn files_in<'a>(
        &'a self,
        module: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a FileCoverage)> + 'a {
        self.files
            .iter()
            .filter(move |(file, _)| module_of(file) == module)
    }
}

/// Module identifier for a file path
pub fn module_of(file: &str) -> String {
    match Path::new(file).parent().map(|p| p.to_string_lossy()) {
        Some(parent) if !parent.is_empty() => parent.into_owned(),
        _ => ROOT_MODULE.to_string(),
    }
}

/// Executed and instrumented probes accumulated across records
///
/// `merge` is a set union, so it is commutative and associative.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageData {
    executed: BTreeSet<Probe>,
    instrumented: BTreeSet<Probe>,
}

impl CoverageData {
    pub fn from_record(record: &TestExecutionRecord) -> Self {
        let mut data = Self::default();
        data.add_record(record);
        data
    }

    pub fn add_record(&mut self, record: &TestExecutionRecord) {
        self.executed.extend(record.executed.iter().cloned());
        self.instrumented.extend(record.instrumented.iter().cloned());
        self.instrumented.extend(record.executed.iter().cloned());
    }

    pub fn merge(mut self, other: &CoverageData) -> Self {
        self.executed.extend(other.executed.iter().cloned());
        self.instrumented.extend(other.instrumented.iter().cloned());
        self
    }

    /// Build the per-file report
    pub fn report(&self) -> CoverageReport {
        let mut files: BTreeMap<String, FileCoverage> = BTreeMap::new();

        for probe in &self.instrumented {
            let entry = files.entry(probe.file.clone()).or_default();
            let counter = match probe.counter() {
                Counter::Line => &mut entry.lines,
                Counter::Branch => &mut entry.branches,
            };
            counter.total += 1;
            if self.executed.contains(probe) {
                counter.covered += 1;
            }
        }

        CoverageReport { files }
    }
}

/// Merges execution records, plus an optional baseline, into a report
#[derive(Clone, Debug, Default)]
pub struct CoverageAggregator {
    baseline: BTreeSet<Probe>,
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a set of probes known to exist even if no test loads them
    pub fn with_baseline(mut self, probes: BTreeSet<Probe>) -> Self {
        self.baseline.extend(probes);
        self
    }

    /// Load baseline tracefiles listing every instrumentable unit
    pub fn load_baseline(paths: &[PathBuf]) -> Result<Self, AggregationError> {
        let mut baseline = BTreeSet::new();
        for path in paths {
            let trace = Tracefile::load(path).map_err(|source| AggregationError::Baseline {
                path: path.clone(),
                source,
            })?;
            let probes = trace.instrumented();
            debug!("Baseline {} declares {} probes", path.display(), probes.len());
            baseline.extend(probes);
        }
        Ok(Self::new().with_baseline(baseline))
    }

    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }

    /// Merge records into a report covering every known file
    pub fn aggregate(&self, records: &[TestExecutionRecord]) -> CoverageReport {
        let base = CoverageData {
            executed: BTreeSet::new(),
            instrumented: self.baseline.clone(),
        };

        let merged = records
            .iter()
            .map(CoverageData::from_record)
            .fold(base, |acc, data| acc.merge(&data));

        let report = merged.report();
        info!(
            "Aggregated {} records into {} files",
            records.len(),
            report.files.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, executed: &[Probe], instrumented: &[Probe]) -> TestExecutionRecord {
        TestExecutionRecord::passed(id, 1).with_coverage(
            executed.iter().cloned().collect(),
            instrumented.iter().cloned().collect(),
        )
    }

    fn sample_records() -> Vec<TestExecutionRecord> {
        vec![
            record(
                "a",
                &[Probe::line("src/service/task.rs", 1)],
                &[
                    Probe::line("src/service/task.rs", 2),
                    Probe::branch("src/service/task.rs", 2, 0, 0),
                    Probe::branch("src/service/task.rs", 2, 0, 1),
                ],
            ),
            record(
                "b",
                &[
                    Probe::line("src/service/task.rs", 2),
                    Probe::branch("src/service/task.rs", 2, 0, 1),
                ],
                &[Probe::line("src/controller/task.rs", 10)],
            ),
            record("c", &[Probe::line("src/controller/task.rs", 11)], &[]),
        ]
    }

    #[test]
    fn test_aggregate_counts() {
        let report = CoverageAggregator::new().aggregate(&sample_records());

        let service = report.files["src/service/task.rs"];
        assert_eq!(service.lines, CounterCoverage::new(2, 2));
        assert_eq!(service.branches, CounterCoverage::new(1, 2));

        let controller = report.files["src/controller/task.rs"];
        assert_eq!(controller.lines, CounterCoverage::new(1, 2));
    }

    #[test]
    fn test_covered_never_exceeds_total() {
        let report = CoverageAggregator::new().aggregate(&sample_records());
        for coverage in report.files.values() {
            assert!(coverage.lines.covered <= coverage.lines.total);
            assert!(coverage.branches.covered <= coverage.branches.total);
        }
        let totals = report.totals();
        assert!(totals.lines.covered <= totals.lines.total);
    }

    #[test]
    fn test_order_independent() {
        let records = sample_records();
        let aggregator = CoverageAggregator::new();
        let expected = aggregator.aggregate(&records);

        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in permutations {
            let shuffled: Vec<_> = order.iter().map(|&i| records[i].clone()).collect();
            assert_eq!(aggregator.aggregate(&shuffled), expected);
        }
    }

    #[test]
    fn test_merge_associative() {
        let data: Vec<_> = sample_records().iter().map(CoverageData::from_record).collect();
        let left = data[0].clone().merge(&data[1]).merge(&data[2]);
        let right = data[0].clone().merge(&data[1].clone().merge(&data[2]));
        assert_eq!(left, right);
    }

    #[test]
    fn test_baseline_includes_untouched_files() {
        let baseline = BTreeSet::from([
            Probe::line("src/mapper/task.rs", 1),
            Probe::line("src/mapper/task.rs", 2),
        ]);
        let report = CoverageAggregator::new()
            .with_baseline(baseline)
            .aggregate(&sample_records());

        assert_eq!(
            report.files["src/mapper/task.rs"].lines,
            CounterCoverage::new(0, 2)
        );
    }

    #[test]
    fn test_empty_input() {
        let report = CoverageAggregator::new().aggregate(&[]);
        assert!(report.is_empty());
        assert_eq!(report.totals(), FileCoverage::default());
    }

    #[test]
    fn test_modules() {
        let report = CoverageAggregator::new().aggregate(&sample_records());
        let modules = report.modules();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules["src/service"].lines, CounterCoverage::new(2, 2));
        assert_eq!(report.files_in("src/controller").count(), 1);
    }

    #[test]
    fn test_module_of() {
        assert_eq!(module_of("src/service/task.rs"), "src/service");
        assert_eq!(module_of("main.rs"), ROOT_MODULE);
    }

    #[test]
    fn test_load_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.info");
        std::fs::write(&path, "SF:src/a.rs\nDA:1,0\nDA:2,0\nend_of_record\n").unwrap();

        let aggregator = CoverageAggregator::load_baseline(&[path]).unwrap();
        assert_eq!(aggregator.baseline_len(), 2);
    }

    #[test]
    fn test_load_baseline_missing() {
        let err = CoverageAggregator::load_baseline(&[PathBuf::from("/nonexistent.info")])
            .unwrap_err();
        assert!(matches!(err, AggregationError::Baseline { .. }));
    }
}
