//! Coverage gate
//!
//! Compares aggregate coverage ratios against configured minimums. The gate is
//! a pure function of the report and its rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::aggregate::{CoverageReport, FileCoverage};
use crate::models::{Counter, CounterCoverage, Ratio, DEFAULT_MINIMUM};

/// Element a rule is checked against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// One check over the whole project
    #[default]
    Project,
    /// Every module must meet the minimum
    Module,
    /// Every file must meet the minimum
    File,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Project => write!(f, "project"),
            RuleScope::Module => write!(f, "module"),
            RuleScope::File => write!(f, "file"),
        }
    }
}

/// Outcome when there is nothing to cover
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    /// Vacuous pass
    #[default]
    Pass,
    Fail,
}

/// A minimum-coverage rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRule {
    #[serde(default = "default_counter")]
    pub counter: Counter,
    pub minimum: Ratio,
    #[serde(default)]
    pub scope: RuleScope,
}

fn default_counter() -> Counter {
    Counter::Line
}

impl GateRule {
    /// Project-wide rule on one counter
    pub fn new(counter: Counter, minimum: Ratio) -> Self {
        Self {
            counter,
            minimum,
            scope: RuleScope::Project,
        }
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }
}

impl Default for GateRule {
    fn default() -> Self {
        Self::new(Counter::Line, DEFAULT_MINIMUM)
    }
}

/// Result of checking one rule against one element
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub counter: Counter,
    pub scope: RuleScope,
    pub element: String,
    pub passed: bool,
    pub covered: u64,
    pub total: u64,
    /// `None` when there are no units to cover
    pub actual_ratio: Option<Ratio>,
    pub threshold: Ratio,
}

impl GateResult {
    fn evaluate(
        counter: Counter,
        scope: RuleScope,
        element: impl Into<String>,
        coverage: CounterCoverage,
        threshold: Ratio,
        empty_policy: EmptyPolicy,
    ) -> Self {
        let actual_ratio = coverage.ratio();
        let passed = match actual_ratio {
            Some(actual) => actual.meets(&threshold),
            None => empty_policy == EmptyPolicy::Pass,
        };

        Self {
            counter,
            scope,
            element: element.into(),
            passed,
            covered: coverage.covered,
            total: coverage.total,
            actual_ratio,
            threshold,
        }
    }

    /// Human-readable verdict stating actual vs. required ratio
    ///
    /// The actual ratio is rounded down to the minimum's scale.
    pub fn message(&self) -> String {
        let digits = self.threshold.decimal_scale().map_or(2, |k| k.max(2));
        let threshold = self.threshold.format_floor(digits);
        match (self.passed, self.actual_ratio) {
            (true, Some(actual)) => format!(
                "{} covered ratio for {} '{}' is {} ({}/{}), minimum is {}",
                self.counter,
                self.scope,
                self.element,
                actual.format_floor(digits),
                self.covered,
                self.total,
                threshold
            ),
            (true, None) => format!(
                "No {} units in {} '{}'; passing vacuously (minimum {})",
                self.counter, self.scope, self.element, threshold
            ),
            (false, Some(actual)) => format!(
                "Rule violated for {} '{}': {} covered ratio is {} ({}/{}), but expected minimum is {}",
                self.scope,
                self.element,
                self.counter,
                actual.format_floor(digits),
                self.covered,
                self.total,
                threshold
            ),
            (false, None) => format!(
                "Rule violated for {} '{}': no {} units to cover and empty coverage is configured to fail (minimum {})",
                self.scope, self.element, self.counter, threshold
            ),
        }
    }
}

impl fmt::Display for GateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.passed { "✓" } else { "✗" };
        write!(f, "{symbol} {}", self.message())
    }
}

/// All rule results for one build
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub results: Vec<GateResult>,
}

impl GateEvaluation {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn violations(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Element name used for project-scope results
pub const PROJECT_ELEMENT: &str = "all";

/// Minimum-coverage policy enforcement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageGate {
    rules: Vec<GateRule>,
    empty_policy: EmptyPolicy,
}

impl CoverageGate {
    pub fn new(rules: Vec<GateRule>, empty_policy: EmptyPolicy) -> Self {
        Self {
            rules,
            empty_policy,
        }
    }

    /// Evaluate every rule against the report
    pub fn evaluate(&self, report: &CoverageReport) -> GateEvaluation {
        let results = self
            .rules
            .iter()
            .flat_map(|rule| self.evaluate_rule(rule, report))
            .collect();
        GateEvaluation { results }
    }

    fn evaluate_rule(&self, rule: &GateRule, report: &CoverageReport) -> Vec<GateResult> {
        let elements: Vec<(String, FileCoverage)> = match rule.scope {
            RuleScope::Project => Vec::new(),
            RuleScope::Module => report.modules().into_iter().collect(),
            RuleScope::File => report
                .files
                .iter()
                .map(|(file, coverage)| (file.clone(), *coverage))
                .collect(),
        };

        // Elements without units of this counter are not checked individually.
        let checked: Vec<GateResult> = elements
            .into_iter()
            .filter(|(_, coverage)| coverage.counter(rule.counter).total > 0)
            .map(|(element, coverage)| {
                GateResult::evaluate(
                    rule.counter,
                    rule.scope,
                    element,
                    coverage.counter(rule.counter),
                    rule.minimum,
                    self.empty_policy,
                )
            })
            .collect();

        if !checked.is_empty() {
            return checked;
        }

        vec![GateResult::evaluate(
            rule.counter,
            RuleScope::Project,
            PROJECT_ELEMENT,
            report.totals().counter(rule.counter),
            rule.minimum,
            self.empty_policy,
        )]
    }
}

#[cfg(test)]
impl CoverageGate {
    /// Single project-wide line rule with the vacuous-pass policy
    pub fn with_threshold(threshold: Ratio) -> Self {
        Self::new(vec![GateRule::new(Counter::Line, threshold)], EmptyPolicy::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn report(entries: &[(&str, u64, u64)]) -> CoverageReport {
        let files: BTreeMap<String, FileCoverage> = entries
            .iter()
            .map(|(file, covered, total)| {
                (
                    file.to_string(),
                    FileCoverage {
                        lines: CounterCoverage::new(*covered, *total),
                        branches: CounterCoverage::default(),
                    },
                )
            })
            .collect();
        CoverageReport { files }
    }

    fn threshold() -> Ratio {
        "0.80".parse().unwrap()
    }

    /// Project-wide line result for one threshold
    fn check(report: &CoverageReport, threshold: Ratio) -> GateResult {
        let mut evaluation = CoverageGate::with_threshold(threshold).evaluate(report);
        assert_eq!(evaluation.results.len(), 1);
        evaluation.results.remove(0)
    }

    #[test]
    fn test_exactly_at_threshold_passes() {
        let result = check(&report(&[("src/a.rs", 80, 100)]), threshold());
        assert!(result.passed);
        assert_eq!(result.actual_ratio, Ratio::new(80, 100));
        assert_eq!(result.threshold, threshold());
    }

    #[test]
    fn test_below_threshold_fails() {
        let result = check(&report(&[("src/a.rs", 79, 100)]), threshold());
        assert!(!result.passed);
        assert_eq!(result.actual_ratio, Ratio::new(79, 100));
        assert_eq!(
            result.message(),
            "Rule violated for project 'all': line covered ratio is 0.79 (79/100), but expected minimum is 0.80"
        );
    }

    #[test]
    fn test_just_below_threshold_never_prints_as_threshold() {
        let result = check(&report(&[("src/a.rs", 7999, 10000)]), threshold());
        assert!(!result.passed);
        assert_eq!(
            result.message(),
            "Rule violated for project 'all': line covered ratio is 0.79 (7999/10000), but expected minimum is 0.80"
        );

        let precise: Ratio = "0.805".parse().unwrap();
        let result = check(&report(&[("src/a.rs", 1609, 2000)]), precise);
        assert!(!result.passed);
        assert!(result.message().contains("is 0.804 (1609/2000)"));
        assert!(result.message().ends_with("minimum is 0.805"));
    }

    #[test]
    fn test_ratio_is_summed_across_files() {
        // 50/50 + 30/50 = 80/100
        let result = check(
            &report(&[("src/a.rs", 50, 50), ("src/b.rs", 30, 50)]),
            threshold(),
        );
        assert!(result.passed);
        assert_eq!(result.actual_ratio, Ratio::new(4, 5));
    }

    #[test]
    fn test_empty_report_passes_vacuously() {
        let result = check(&CoverageReport::default(), threshold());
        assert!(result.passed);
        assert_eq!(result.actual_ratio, None);

        let zero_units = check(&report(&[("src/a.rs", 0, 0)]), threshold());
        assert!(zero_units.passed);
    }

    #[test]
    fn test_empty_report_fail_policy() {
        let gate = CoverageGate::new(vec![GateRule::default()], EmptyPolicy::Fail);
        let evaluation = gate.evaluate(&CoverageReport::default());
        assert!(!evaluation.passed());
        assert!(evaluation.results[0].message().contains("configured to fail"));
    }

    #[test]
    fn test_gate_is_pure() {
        let gate = CoverageGate::new(vec![GateRule::default()], EmptyPolicy::Pass);
        let input = report(&[("src/a.rs", 79, 100)]);
        assert_eq!(gate.evaluate(&input), gate.evaluate(&input));
    }

    #[test]
    fn test_module_scope() {
        let gate = CoverageGate::new(
            vec![GateRule::default().with_scope(RuleScope::Module)],
            EmptyPolicy::Pass,
        );
        let input = report(&[
            ("src/service/a.rs", 90, 100),
            ("src/mapper/b.rs", 10, 100),
        ]);
        let evaluation = gate.evaluate(&input);

        assert_eq!(evaluation.results.len(), 2);
        assert!(!evaluation.passed());
        let violations: Vec<_> = evaluation.violations().collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].element, "src/mapper");
    }

    #[test]
    fn test_branch_rule_without_branches_falls_back_to_project() {
        let gate = CoverageGate::new(
            vec![GateRule::new(Counter::Branch, threshold()).with_scope(RuleScope::File)],
            EmptyPolicy::Pass,
        );
        let evaluation = gate.evaluate(&report(&[("src/a.rs", 1, 1)]));
        assert_eq!(evaluation.results.len(), 1);
        assert_eq!(evaluation.results[0].scope, RuleScope::Project);
        assert!(evaluation.passed());
    }

    #[test]
    fn test_multiple_rules_all_must_pass() {
        let gate = CoverageGate::new(
            vec![
                GateRule::new(Counter::Line, threshold()),
                GateRule::new(Counter::Line, "0.95".parse().unwrap()),
            ],
            EmptyPolicy::Pass,
        );
        let evaluation = gate.evaluate(&report(&[("src/a.rs", 90, 100)]));
        assert_eq!(evaluation.results.len(), 2);
        assert!(!evaluation.passed());
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: GateRule = serde_yaml::from_str("minimum: 0.8\n").unwrap();
        assert_eq!(rule, GateRule::default());
    }
}
