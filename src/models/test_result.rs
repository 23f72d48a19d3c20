//! Test execution records
//!
//! Defines test outcomes, per-test execution records and run summaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::Probe;

/// Outcome of a single test execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl TestOutcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "✓",
            TestOutcome::Failed => "✗",
            TestOutcome::Errored => "!",
            TestOutcome::Skipped => "○",
        }
    }

    /// Whether this outcome fails the build
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed | TestOutcome::Errored)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => write!(f, "PASS"),
            TestOutcome::Failed => write!(f, "FAIL"),
            TestOutcome::Errored => write!(f, "ERROR"),
            TestOutcome::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Result of executing one test, with the probes it reached
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionRecord {
    pub test_id: String,
    pub outcome: TestOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probes with a non-zero hit count
    #[serde(default)]
    pub executed: BTreeSet<Probe>,
    /// Every probe the test's tracefile declared, hit or not
    #[serde(default)]
    pub instrumented: BTreeSet<Probe>,
}

impl TestExecutionRecord {
    fn new(test_id: impl Into<String>, outcome: TestOutcome, duration_ms: u64) -> Self {
        Self {
            test_id: test_id.into(),
            outcome,
            duration_ms,
            message: None,
            executed: BTreeSet::new(),
            instrumented: BTreeSet::new(),
        }
    }

    pub fn passed(test_id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(test_id, TestOutcome::Passed, duration_ms)
    }

    pub fn failed(test_id: impl Into<String>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::new(test_id, TestOutcome::Failed, duration_ms).with_message(message)
    }

    pub fn errored(test_id: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self::new(test_id, TestOutcome::Errored, duration_ms).with_message(error)
    }

    pub fn skipped(test_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(test_id, TestOutcome::Skipped, 0).with_message(reason)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach coverage; executed probes are always counted as instrumented
    pub fn with_coverage(
        mut self,
        executed: BTreeSet<Probe>,
        mut instrumented: BTreeSet<Probe>,
    ) -> Self {
        instrumented.extend(executed.iter().cloned());
        self.executed = executed;
        self.instrumented = instrumented;
        self
    }
}

impl fmt::Display for TestExecutionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.test_id,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of one test run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
    pub records: Vec<TestExecutionRecord>,
}

impl TestRunSummary {
    pub fn new(records: Vec<TestExecutionRecord>) -> Self {
        let count = |outcome: TestOutcome| records.iter().filter(|r| r.outcome == outcome).count();

        Self {
            total: records.len(),
            passed: count(TestOutcome::Passed),
            failed: count(TestOutcome::Failed),
            errored: count(TestOutcome::Errored),
            skipped: count(TestOutcome::Skipped),
            total_duration_ms: records.iter().map(|r| r.duration_ms).sum(),
            records,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        let executed = self.total - self.skipped;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }

    /// Whether any test failed or errored
    pub fn has_failures(&self) -> bool {
        self.failed + self.errored > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestExecutionRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }
}

impl fmt::Display for TestRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for record in &self.records {
            writeln!(f, "  {record}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {}",
            self.total, self.passed, self.failed, self.errored, self.skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
