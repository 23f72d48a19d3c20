//! Coverage aggregation and verification
//!
//! Reads LCOV tracefiles, merges execution records into a report and
//! enforces minimum-coverage rules.

mod aggregate;
mod gate;
mod lcov;

pub use aggregate::{
    module_of, AggregationError, CoverageAggregator, CoverageReport, FileCoverage,
};
pub use gate::{CoverageGate, EmptyPolicy, GateEvaluation, GateResult, GateRule, RuleScope};
pub use lcov::Tracefile;
