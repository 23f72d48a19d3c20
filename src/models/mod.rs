//! Data models for coverage verification
//!
//! This module contains all data structures shared by the pipeline stages.

mod probe;
mod ratio;
mod test_result;
mod test_spec;

pub use probe::{BranchId, Counter, CounterCoverage, Probe};
pub use ratio::{Ratio, DEFAULT_MINIMUM};
pub use test_result::{TestExecutionRecord, TestOutcome, TestRunSummary};
pub use test_spec::TestSpec;
