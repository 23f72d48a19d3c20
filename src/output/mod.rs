//! Console output
//!
//! Renders test runs, coverage tables and gate verdicts for the terminal.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
