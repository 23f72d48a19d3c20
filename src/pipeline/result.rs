//! Build outcome and process exit contract

use serde::Serialize;
use std::path::PathBuf;

use super::PipelineState;
use crate::coverage::{CoverageReport, GateEvaluation};
use crate::models::TestRunSummary;

pub const EXIT_OK: i32 = 0;
pub const EXIT_TEST_FAILURE: i32 = 1;
pub const EXIT_GATE_VIOLATION: i32 = 2;
pub const EXIT_TEST_AND_GATE: i32 = 3;
pub const EXIT_POST_GATE_FAILURE: i32 = 4;

/// Result of the step that runs after a passed gate
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostGateOutcome {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything one pipeline invocation produced
#[derive(Clone, Debug, Serialize)]
pub struct BuildResult {
    pub state: PipelineState,

    /// Present when tests ran in this invocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestRunSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageReport>,

    /// Present when the gate was evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateEvaluation>,

    pub reports: Vec<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_gate: Option<PostGateOutcome>,
}

impl BuildResult {
    pub fn new(state: PipelineState) -> Self {
        Self {
            state,
            tests: None,
            coverage: None,
            gate: None,
            reports: Vec::new(),
            post_gate: None,
        }
    }

    /// A test failed or errored
    pub fn tests_failed(&self) -> bool {
        self.tests.as_ref().is_some_and(|t| t.has_failures())
    }

    /// The gate was evaluated and at least one rule was violated
    pub fn gate_failed(&self) -> bool {
        self.gate.as_ref().is_some_and(|g| !g.passed())
    }

    pub fn post_gate_failed(&self) -> bool {
        self.post_gate.as_ref().is_some_and(|p| !p.success)
    }

    pub fn success(&self) -> bool {
        self.exit_code() == EXIT_OK
    }

    /// Process exit status for this build
    pub fn exit_code(&self) -> i32 {
        if self.post_gate_failed() {
            return EXIT_POST_GATE_FAILURE;
        }
        match (self.tests_failed(), self.gate_failed()) {
            (false, false) => EXIT_OK,
            (true, false) => EXIT_TEST_FAILURE,
            (false, true) => EXIT_GATE_VIOLATION,
            (true, true) => EXIT_TEST_AND_GATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageGate, FileCoverage};
    use crate::models::{CounterCoverage, Ratio, TestExecutionRecord};

    fn evaluation(covered: u64, total: u64) -> GateEvaluation {
        let mut report = CoverageReport::default();
        report.files.insert(
            "src/lib.rs".to_string(),
            FileCoverage {
                lines: CounterCoverage::new(covered, total),
                branches: CounterCoverage::default(),
            },
        );
        CoverageGate::with_threshold(Ratio::new(4, 5).unwrap()).evaluate(&report)
    }

    fn result(test_failed: bool, gate: Option<GateEvaluation>) -> BuildResult {
        let record = if test_failed {
            TestExecutionRecord::failed("t", 1, "exited with code 1")
        } else {
            TestExecutionRecord::passed("t", 1)
        };
        let mut result = BuildResult::new(PipelineState::Aggregating);
        result.tests = Some(TestRunSummary::new(vec![record]));
        result.gate = gate;
        result
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(result(false, Some(evaluation(80, 100))).exit_code(), EXIT_OK);
        assert_eq!(
            result(true, Some(evaluation(100, 100))).exit_code(),
            EXIT_TEST_FAILURE
        );
        assert_eq!(
            result(false, Some(evaluation(79, 100))).exit_code(),
            EXIT_GATE_VIOLATION
        );
        assert_eq!(
            result(true, Some(evaluation(0, 100))).exit_code(),
            EXIT_TEST_AND_GATE
        );
    }

    #[test]
    fn test_without_gate_only_tests_count() {
        assert_eq!(result(false, None).exit_code(), EXIT_OK);
        assert_eq!(result(true, None).exit_code(), EXIT_TEST_FAILURE);
    }

    #[test]
    fn test_post_gate_failure() {
        let mut build = result(false, Some(evaluation(90, 100)));
        build.post_gate = Some(PostGateOutcome {
            name: "package".to_string(),
            success: false,
            exit_code: Some(2),
            message: None,
        });
        assert_eq!(build.exit_code(), EXIT_POST_GATE_FAILURE);
        assert!(!build.success());
    }
}
