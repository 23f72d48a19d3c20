//! Test execution engine
//!
//! Provides sequential and parallel test execution capabilities.

mod parallel;
mod runner;

pub use parallel::ParallelExecutor;
pub use runner::{TestRunner, TEST_ID_ENV, TRACEFILE_ENV};
