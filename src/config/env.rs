//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use super::GateConfig;
use crate::executor::{TEST_ID_ENV, TRACEFILE_ENV};
use crate::models::Ratio;
use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "COVERAGE_GATE";

/// Environment configuration from environment variables
///
/// Values that need validation are kept as text and parsed when applied, so
/// a bad value is reported instead of ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Config file from COVERAGE_GATE_CONFIG
    pub config_file: Option<String>,
    /// Profile from COVERAGE_GATE_PROFILE
    pub profile: Option<String>,
    /// Line minimum from COVERAGE_GATE_THRESHOLD
    pub threshold: Option<String>,
    /// Build directory from COVERAGE_GATE_BUILD_DIR
    pub build_dir: Option<String>,
    /// Parallel from COVERAGE_GATE_PARALLEL
    pub parallel: Option<bool>,
    /// Concurrency limit from COVERAGE_GATE_MAX_CONCURRENT
    pub max_concurrent: Option<String>,
    /// Per-test timeout in seconds from COVERAGE_GATE_TIMEOUT
    pub timeout: Option<String>,
    /// Output format from COVERAGE_GATE_FORMAT
    pub format: Option<String>,
    /// Verbose from COVERAGE_GATE_VERBOSE
    pub verbose: Option<bool>,
    /// Log level from COVERAGE_GATE_LOG_LEVEL
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}_{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            config_file: get("CONFIG"),
            profile: get("PROFILE"),
            threshold: get("THRESHOLD"),
            build_dir: get("BUILD_DIR"),
            parallel: get("PARALLEL").map(|v| parse_bool(&v)),
            max_concurrent: get("MAX_CONCURRENT"),
            timeout: get("TIMEOUT"),
            format: get("FORMAT"),
            verbose: get("VERBOSE").map(|v| parse_bool(&v)),
            log_level: get("LOG_LEVEL"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.profile.is_some()
            || self.threshold.is_some()
            || self.build_dir.is_some()
            || self.parallel.is_some()
            || self.max_concurrent.is_some()
            || self.timeout.is_some()
            || self.format.is_some()
            || self.verbose.is_some()
            || self.log_level.is_some()
    }

    /// Requested log level, if COVERAGE_GATE_LOG_LEVEL is set
    pub fn log_level(&self) -> Result<Option<LogLevel>> {
        self.log_level
            .as_deref()
            .map(|name| {
                LogLevel::from_str(name).with_context(|| {
                    format!(
                        "Invalid {ENV_PREFIX}_LOG_LEVEL '{name}': expected trace, debug, info, warn or error"
                    )
                })
            })
            .transpose()
    }

    /// Apply the overrides that map onto resolved settings
    pub fn apply(&self, config: &mut GateConfig) -> Result<()> {
        if let Some(threshold) = &self.threshold {
            let minimum: Ratio = threshold
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}_THRESHOLD '{threshold}'"))?;
            config.gate.set_threshold(minimum);
        }
        if let Some(build_dir) = &self.build_dir {
            config.build_dir = PathBuf::from(build_dir);
        }
        if let Some(parallel) = self.parallel {
            config.runner.parallel = parallel;
        }
        if let Some(value) = &self.max_concurrent {
            config.runner.max_concurrent = parse_positive("MAX_CONCURRENT", value)?;
        }
        if let Some(value) = &self.timeout {
            config.runner.timeout_secs = parse_positive("TIMEOUT", value)?;
        }
        Ok(())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        if !self.has_any() {
            println!("  (no {ENV_PREFIX}_* variables set)");
            return;
        }
        println!("  {ENV_PREFIX}_CONFIG:          {:?}", self.config_file);
        println!("  {ENV_PREFIX}_PROFILE:         {:?}", self.profile);
        println!("  {ENV_PREFIX}_THRESHOLD:       {:?}", self.threshold);
        println!("  {ENV_PREFIX}_BUILD_DIR:       {:?}", self.build_dir);
        println!("  {ENV_PREFIX}_PARALLEL:        {:?}", self.parallel);
        println!("  {ENV_PREFIX}_MAX_CONCURRENT:  {:?}", self.max_concurrent);
        println!("  {ENV_PREFIX}_TIMEOUT:         {:?}", self.timeout);
        println!("  {ENV_PREFIX}_FORMAT:          {:?}", self.format);
        println!("  {ENV_PREFIX}_VERBOSE:         {:?}", self.verbose);
        println!("  {ENV_PREFIX}_LOG_LEVEL:       {:?}", self.log_level);
    }
}

/// Parse a count that must be at least 1
fn parse_positive<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .parse()
        .with_context(|| format!("Invalid {ENV_PREFIX}_{name} '{value}'"))?;
    if parsed == T::default() {
        anyhow::bail!("{ENV_PREFIX}_{name} must be at least 1");
    }
    Ok(parsed)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}

/// Print all COVERAGE_GATE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  {ENV_PREFIX}_PROFILE         Profile to apply (e.g. test, release)");
    println!("  {ENV_PREFIX}_THRESHOLD       Project line minimum (0.80 or 80%)");
    println!("  {ENV_PREFIX}_BUILD_DIR       Build directory for data and reports");
    println!("  {ENV_PREFIX}_PARALLEL        Run tests concurrently (true/false)");
    println!("  {ENV_PREFIX}_MAX_CONCURRENT  Maximum concurrent tests");
    println!("  {ENV_PREFIX}_TIMEOUT         Per-test timeout in seconds");
    println!("  {ENV_PREFIX}_FORMAT          Output format (table, json, json-pretty, summary)");
    println!("  {ENV_PREFIX}_VERBOSE         Enable debug logging (true/false)");
    println!("  {ENV_PREFIX}_LOG_LEVEL       Log level (trace, debug, info, warn, error)");
    println!();
    println!("Tests receive:");
    println!("  {TRACEFILE_ENV:<27} Where the test must write its LCOV tracefile");
    println!("  {TEST_ID_ENV:<27} Id of the running test");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_THRESHOLD=0.85");
    println!("  coverage-gate check");
}
