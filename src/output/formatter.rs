//! Console formatters for test runs, coverage and gate results
//!
//! Provides table, JSON, and one-line summary output.

use serde::Serialize;
use std::path::PathBuf;

use crate::coverage::{CoverageReport, FileCoverage, GateEvaluation, GateResult};
use crate::models::{CounterCoverage, TestExecutionRecord, TestOutcome, TestRunSummary};
use crate::pipeline::{BuildResult, PipelineState, PostGateOutcome};

const RULE: &str = "══════════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "──────────────────────────────────────────────────────────────────────";

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    /// Format a single test record
    pub fn format_record(&self, record: &TestExecutionRecord) -> String {
        match self.format {
            OutputFormat::Table => self.format_record_table(record),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&RecordJson::from(record)),
            OutputFormat::Summary => format!(
                "{} {} ({}ms)",
                record.outcome.symbol(),
                record.test_id,
                record.duration_ms
            ),
        }
    }

    fn format_record_table(&self, record: &TestExecutionRecord) -> String {
        let label = format!("{} {}", record.outcome.symbol(), record.outcome);
        let status = match record.outcome {
            TestOutcome::Passed => self.paint(&label, "32"),
            TestOutcome::Failed | TestOutcome::Errored => self.paint(&label, "31"),
            TestOutcome::Skipped => self.paint(&label, "33"),
        };

        let mut line = format!(
            "  {:28} {} [{:>7}ms]",
            record.test_id, status, record.duration_ms
        );
        if let Some(message) = record.message.as_deref().filter(|_| record.outcome.is_failure()) {
            line.push_str(&format!("\n      {message}"));
        }
        line
    }

    /// Format a test run summary
    pub fn format_summary(&self, summary: &TestRunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&TestsJson::from(summary)),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &TestRunSummary) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{RULE}\n Tests\n{THIN_RULE}\n"));
        for record in &summary.records {
            output.push_str(&self.format_record_table(record));
            output.push('\n');
        }
        output.push_str(THIN_RULE);
        output.push('\n');

        let failed = summary.failed + summary.errored;
        let failed_str = if failed > 0 {
            self.paint(&failed.to_string(), "31")
        } else {
            failed.to_string()
        };
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Pass Rate: {:.1}% | {}ms\n",
            summary.total,
            self.paint(&summary.passed.to_string(), "32"),
            failed_str,
            summary.skipped,
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        output
    }

    /// One line of counts, then one line per failing test
    fn format_summary_brief(&self, summary: &TestRunSummary) -> String {
        let mut output = format!(
            "Tests: {}/{} passed ({:.1}%), {} failed, {} errored, {} skipped in {}ms",
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.failed,
            summary.errored,
            summary.skipped,
            summary.total_duration_ms
        );
        for record in summary.records.iter().filter(|r| r.outcome.is_failure()) {
            output.push_str("\n  ");
            output.push_str(&self.format_record(record));
        }
        output
    }

    /// Format the per-module coverage table
    pub fn format_coverage(&self, report: &CoverageReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_coverage_table(report),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(report),
            OutputFormat::Summary => {
                let totals = report.totals();
                format!(
                    "Coverage: lines {}, branches {}",
                    totals.lines, totals.branches
                )
            }
        }
    }

    fn format_coverage_table(&self, report: &CoverageReport) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{RULE}\n Coverage\n{THIN_RULE}\n"));
        output.push_str(&format!(
            " {:36} {:>14} {:>14}\n",
            "Module", "Lines", "Branches"
        ));
        output.push_str(THIN_RULE);
        output.push('\n');
        for (module, coverage) in report.modules() {
            output.push_str(&self.coverage_row(&module, &coverage));
        }
        output.push_str(THIN_RULE);
        output.push('\n');
        output.push_str(&self.coverage_row("Total", &report.totals()));
        output
    }

    fn coverage_row(&self, label: &str, coverage: &FileCoverage) -> String {
        format!(
            " {:36} {:>14} {:>14}\n",
            truncate(label, 36),
            counter_cell(&coverage.lines),
            counter_cell(&coverage.branches)
        )
    }

    /// Format gate results, one line per checked element
    pub fn format_gate(&self, evaluation: &GateEvaluation) -> String {
        match self.format {
            OutputFormat::Table => self.format_gate_table(evaluation),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(evaluation),
            OutputFormat::Summary => {
                let violations = evaluation.violations().count();
                if violations == 0 {
                    format!("Gate: passed ({} checks)", evaluation.results.len())
                } else {
                    format!(
                        "Gate: failed ({violations} of {} checks)",
                        evaluation.results.len()
                    )
                }
            }
        }
    }

    fn format_gate_table(&self, evaluation: &GateEvaluation) -> String {
        let mut output = String::new();
        output.push_str(&format!("\n{RULE}\n Coverage Gate\n{THIN_RULE}\n"));
        for result in &evaluation.results {
            output.push_str(&format!(" {}\n", self.gate_line(result)));
        }
        output.push_str(THIN_RULE);
        output.push('\n');
        let verdict = if evaluation.passed() {
            self.paint("PASSED", "32")
        } else {
            self.paint("FAILED", "31")
        };
        output.push_str(&format!(" Gate {verdict}\n"));
        output
    }

    fn gate_line(&self, result: &GateResult) -> String {
        if result.passed {
            format!("{} {}", self.paint("✓", "32"), result.message())
        } else {
            format!("{} {}", self.paint("✗", "31"), result.message())
        }
    }

    /// Format everything a pipeline invocation produced
    pub fn format_build(&self, build: &BuildResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&BuildJson::from(build)),
            OutputFormat::Table | OutputFormat::Summary => {
                let mut parts = Vec::new();
                if let Some(tests) = &build.tests {
                    parts.push(self.format_summary(tests));
                }
                if let Some(coverage) = &build.coverage {
                    parts.push(self.format_coverage(coverage));
                }
                if let Some(gate) = &build.gate {
                    parts.push(self.format_gate(gate));
                }
                for path in &build.reports {
                    parts.push(format!("Report: {}", path.display()));
                }
                if let Some(step) = &build.post_gate {
                    parts.push(self.post_gate_line(step));
                }
                parts.join("\n")
            }
        }
    }

    fn post_gate_line(&self, step: &PostGateOutcome) -> String {
        if step.success {
            format!("{} Post-gate step '{}' succeeded", self.paint("✓", "32"), step.name)
        } else {
            format!(
                "{} Post-gate step '{}' failed: {}",
                self.paint("✗", "31"),
                step.name,
                step.message.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

#[derive(Serialize)]
struct RecordJson<'a> {
    test_id: &'a str,
    outcome: TestOutcome,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    executed_probes: usize,
}

impl<'a> From<&'a TestExecutionRecord> for RecordJson<'a> {
    fn from(record: &'a TestExecutionRecord) -> Self {
        Self {
            test_id: &record.test_id,
            outcome: record.outcome,
            duration_ms: record.duration_ms,
            message: record.message.as_deref(),
            executed_probes: record.executed.len(),
        }
    }
}

#[derive(Serialize)]
struct TestsJson<'a> {
    total: usize,
    passed: usize,
    failed: usize,
    errored: usize,
    skipped: usize,
    duration_ms: u64,
    records: Vec<RecordJson<'a>>,
}

impl<'a> From<&'a TestRunSummary> for TestsJson<'a> {
    fn from(summary: &'a TestRunSummary) -> Self {
        Self {
            total: summary.total,
            passed: summary.passed,
            failed: summary.failed,
            errored: summary.errored,
            skipped: summary.skipped,
            duration_ms: summary.total_duration_ms,
            records: summary.records.iter().map(RecordJson::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct BuildJson<'a> {
    exit_code: i32,
    #[serde(flatten)]
    state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    tests: Option<TestsJson<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<FileCoverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gate: Option<&'a GateEvaluation>,
    reports: &'a [PathBuf],
    #[serde(skip_serializing_if = "Option::is_none")]
    post_gate: Option<&'a PostGateOutcome>,
}

impl<'a> From<&'a BuildResult> for BuildJson<'a> {
    fn from(build: &'a BuildResult) -> Self {
        Self {
            exit_code: build.exit_code(),
            state: build.state,
            tests: build.tests.as_ref().map(TestsJson::from),
            totals: build.coverage.as_ref().map(|c| c.totals()),
            gate: build.gate.as_ref(),
            reports: &build.reports,
            post_gate: build.post_gate.as_ref(),
        }
    }
}

fn counter_cell(counter: &CounterCoverage) -> String {
    if counter.total == 0 {
        "n/a".to_string()
    } else {
        format!("{}/{} {:5.1}%", counter.covered, counter.total, counter.percent())
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageGate;
    use crate::models::{Probe, Ratio};
    use std::collections::BTreeSet;

    fn report(covered: u64, total: u64) -> CoverageReport {
        let mut report = CoverageReport::default();
        report.files.insert(
            "src/lib.rs".to_string(),
            FileCoverage {
                lines: CounterCoverage::new(covered, total),
                branches: CounterCoverage::default(),
            },
        );
        report
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_formatter_creation() {
        let formatter = ResultFormatter::new(OutputFormat::Json).no_color();
        assert_eq!(formatter.format, OutputFormat::Json);
        assert!(!formatter.colorize);
    }

    #[test]
    fn test_format_record() {
        let record = TestExecutionRecord::failed("integration", 12, "exited with code 1");
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_record(&record);
        assert!(output.contains("✗ FAIL"));
        assert!(output.contains("exited with code 1"));

        let summary = ResultFormatter::new(OutputFormat::Summary).format_record(&record);
        assert_eq!(summary, "✗ integration (12ms)");
    }

    #[test]
    fn test_summary_lists_failing_tests() {
        let summary = TestRunSummary::new(vec![
            TestExecutionRecord::passed("unit", 5),
            TestExecutionRecord::failed("integration", 12, "exited with code 1"),
        ]);
        let output = ResultFormatter::new(OutputFormat::Summary).format_summary(&summary);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Tests: 1/2 passed"));
        assert_eq!(lines[1], "  ✗ integration (12ms)");
    }

    #[test]
    fn test_record_json_omits_probes() {
        let record = TestExecutionRecord::passed("unit", 3).with_coverage(
            BTreeSet::from([Probe::line("src/lib.rs", 1)]),
            BTreeSet::new(),
        );
        let json = ResultFormatter::new(OutputFormat::Json).format_record(&record);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["executed_probes"], 1);
        assert!(value.get("executed").is_none());
    }

    #[test]
    fn test_format_gate_shows_actual_and_required() {
        let evaluation = CoverageGate::with_threshold(Ratio::new(4, 5).unwrap()).evaluate(&report(79, 100));
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_gate(&evaluation);
        assert!(output.contains("0.79 (79/100)"));
        assert!(output.contains("expected minimum is 0.80"));
        assert!(output.contains("Gate FAILED"));

        let brief = ResultFormatter::new(OutputFormat::Summary).format_gate(&evaluation);
        assert_eq!(brief, "Gate: failed (1 of 1 checks)");
    }

    #[test]
    fn test_format_coverage_table() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_coverage(&report(3, 4));
        assert!(output.contains("src"));
        assert!(output.contains("3/4  75.0%"));
        assert!(output.contains("n/a"));
    }

    #[test]
    fn test_format_build_json() {
        let mut build = BuildResult::new(PipelineState::Gated { passed: false });
        build.coverage = Some(report(79, 100));
        build.gate = Some(CoverageGate::with_threshold(Ratio::new(4, 5).unwrap()).evaluate(&report(79, 100)));

        let json = ResultFormatter::new(OutputFormat::Json).format_build(&build);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["exit_code"], 2);
        assert_eq!(value["state"], "gated");
        assert_eq!(value["passed"], false);
        assert_eq!(value["totals"]["lines"]["covered"], 79);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
