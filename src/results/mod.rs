//! Execution data storage and report artifacts
//!
//! Persists raw test-run data and renders coverage reports from it.

mod report;
mod storage;

pub use report::ReportGenerator;
pub use storage::{ExecutionData, ExecutionStore};
