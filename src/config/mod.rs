//! Configuration module
//!
//! Handles loading and layering configuration. The resolved [`GateConfig`] is
//! built once at startup and shared read-only with every pipeline stage.

mod env;
mod file;
mod profile;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::coverage::{CoverageGate, EmptyPolicy, GateRule, RuleScope};
use crate::models::{Counter, Ratio, TestSpec};

/// Resolved application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Root for execution data and report artifacts
    pub build_dir: PathBuf,

    /// Test execution settings
    pub runner: RunnerSettings,

    /// Coverage rules
    pub gate: GateSettings,

    /// Report artifacts
    pub report: ReportSettings,

    /// Tracefiles declaring every instrumentable unit of the project
    pub baseline: Vec<PathBuf>,

    /// Test cases
    pub tests: Vec<TestSpec>,

    /// Step that only runs once tests and gate have passed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_gate: Option<PostGateStep>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("build"),
            runner: RunnerSettings::default(),
            gate: GateSettings::default(),
            report: ReportSettings::default(),
            baseline: Vec::new(),
            tests: Vec::new(),
            after_gate: None,
        }
    }
}

impl GateConfig {
    /// Resolve a path relative to the build directory
    pub fn build_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.build_dir.join(path)
        }
    }
}

/// Test execution settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Run tests concurrently
    pub parallel: bool,

    /// Maximum concurrent tests
    pub max_concurrent: usize,

    /// Default per-test timeout in seconds
    pub timeout_secs: u64,

    /// Environment variables passed to every test
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            max_concurrent: 4,
            timeout_secs: 600,
            env: BTreeMap::new(),
        }
    }
}

/// Coverage gate settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub rules: Vec<GateRule>,
    pub empty_policy: EmptyPolicy,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            rules: vec![GateRule::default()],
            empty_policy: EmptyPolicy::Pass,
        }
    }
}

impl GateSettings {
    /// Override the project-wide line minimum, adding the rule if absent
    pub fn set_threshold(&mut self, minimum: Ratio) {
        let mut found = false;
        for rule in &mut self.rules {
            if rule.counter == Counter::Line && rule.scope == RuleScope::Project {
                rule.minimum = minimum;
                found = true;
            }
        }
        if !found {
            self.rules.push(GateRule::new(Counter::Line, minimum));
        }
    }

    pub fn gate(&self) -> CoverageGate {
        CoverageGate::new(self.rules.clone(), self.empty_policy)
    }
}

/// One report artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTarget {
    /// Listing a target without `enabled` turns it on
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Output path, relative to the build directory unless absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

impl ReportTarget {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            output: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    fn output_or(&self, default: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(default))
    }
}

/// Default HTML report directory under the build directory
pub const DEFAULT_HTML_DIR: &str = "coverage-html";
/// Default JSON report file under the build directory
pub const DEFAULT_JSON_FILE: &str = "coverage-report.json";
/// Default CSV report file under the build directory
pub const DEFAULT_CSV_FILE: &str = "coverage-report.csv";

/// Report artifact settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub html: ReportTarget,
    pub json: ReportTarget,
    pub csv: ReportTarget,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            html: ReportTarget::enabled(),
            json: ReportTarget::disabled(),
            csv: ReportTarget::disabled(),
        }
    }
}

impl ReportSettings {
    pub fn html_output(&self) -> PathBuf {
        self.html.output_or(DEFAULT_HTML_DIR)
    }

    pub fn json_output(&self) -> PathBuf {
        self.json.output_or(DEFAULT_JSON_FILE)
    }

    pub fn csv_output(&self) -> PathBuf {
        self.csv.output_or(DEFAULT_CSV_FILE)
    }
}

/// Downstream step (packaging, deployment) blocked by the gate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostGateStep {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Seconds before the step is killed; defaults to the runner timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}
