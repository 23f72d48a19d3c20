//! Instrumentation probes and coverage counters
//!
//! A probe is one instrumentable unit: a source line or a branch outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Ratio;

/// Kind of unit a coverage ratio is computed over
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Counter {
    Line,
    Branch,
}

impl Counter {
    pub fn name(&self) -> &'static str {
        match self {
            Counter::Line => "line",
            Counter::Branch => "branch",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branch identifier within a line (LCOV block and branch numbers)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId {
    pub block: u32,
    pub branch: u32,
}

/// One instrumentable unit of source code
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Probe {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchId>,
}

impl Probe {
    /// Line probe
    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            branch: None,
        }
    }

    /// Branch probe
    pub fn branch(file: impl Into<String>, line: u32, block: u32, branch: u32) -> Self {
        Self {
            file: file.into(),
            line,
            branch: Some(BranchId { block, branch }),
        }
    }

    pub fn counter(&self) -> Counter {
        if self.branch.is_some() {
            Counter::Branch
        } else {
            Counter::Line
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch {
            Some(b) => write!(f, "{}:{} [{}.{}]", self.file, self.line, b.block, b.branch),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Covered and total units for one counter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterCoverage {
    pub covered: u64,
    pub total: u64,
}

impl CounterCoverage {
    pub fn new(covered: u64, total: u64) -> Self {
        debug_assert!(covered <= total);
        Self { covered, total }
    }

    pub fn missed(&self) -> u64 {
        self.total - self.covered
    }

    /// Covered ratio, `None` when there is nothing to cover
    pub fn ratio(&self) -> Option<Ratio> {
        Ratio::new(self.covered, self.total)
    }

    /// Percentage for display; empty counters show as 0%
    pub fn percent(&self) -> f64 {
        self.ratio().map(|r| r.percent()).unwrap_or(0.0)
    }

    pub fn add(&mut self, other: CounterCoverage) {
        self.covered += other.covered;
        self.total += other.total;
    }
}

impl fmt::Display for CounterCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ratio() {
            Some(r) => write!(f, "{}/{} ({:.1}%)", self.covered, self.total, r.percent()),
            None => write!(f, "0/0 (n/a)"),
        }
    }
}
