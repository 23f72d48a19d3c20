//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::profile::Profile;
use super::{GateConfig, PostGateStep, ReportTarget};
use crate::coverage::{GateRule, RuleScope};
use crate::models::{Counter, TestSpec, DEFAULT_MINIMUM};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./coverage-gate.yaml",
    "./coverage-gate.yml",
    "./.coverage-gate.yaml",
    "./.coverage-gate/config.yaml",
    "~/.config/coverage-gate/config.yaml",
];

/// Supported config file versions
const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Base settings
    #[serde(flatten)]
    pub settings: GateConfig,

    /// Named overlays
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<Profile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            settings: GateConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(&path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        let settings = &self.settings;

        let mut ids = HashSet::new();
        let mut tracefiles = HashMap::new();
        for test in &settings.tests {
            if test.id.trim().is_empty() {
                anyhow::bail!("Test ids must not be empty");
            }
            if !ids.insert(test.id.as_str()) {
                anyhow::bail!("Duplicate test id '{}'", test.id);
            }
            if test.command.is_empty() {
                anyhow::bail!("Test '{}' has an empty command", test.id);
            }
            if test.timeout_secs == Some(0) {
                anyhow::bail!("Test '{}' has a zero timeout", test.id);
            }
            if let Some(path) = &test.tracefile {
                if let Some(other) = tracefiles.insert(path, test.id.as_str()) {
                    anyhow::bail!(
                        "Tests '{}' and '{}' write the same tracefile {}",
                        other,
                        test.id,
                        path.display()
                    );
                }
            }
        }

        if settings.runner.max_concurrent == 0 {
            anyhow::bail!("runner.max_concurrent must be at least 1");
        }
        if settings.runner.timeout_secs == 0 {
            anyhow::bail!("runner.timeout_secs must be at least 1");
        }

        if settings.gate.rules.is_empty() {
            anyhow::bail!("gate.rules must contain at least one rule");
        }

        if let Some(step) = &settings.after_gate {
            if step.command.is_empty() {
                anyhow::bail!("after_gate step '{}' has an empty command", step.name);
            }
            if step.timeout_secs == Some(0) {
                anyhow::bail!("after_gate step '{}' has a zero timeout", step.name);
            }
        }

        let mut names = HashSet::new();
        for profile in &self.profiles {
            if !names.insert(profile.name.as_str()) {
                anyhow::bail!("Duplicate profile '{}'", profile.name);
            }
        }

        Ok(())
    }

    /// Get profile by name
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Produce the base settings with the named profile applied
    ///
    /// Profiles declared in the file shadow the builtin ones of the same name.
    pub fn resolve(&self, profile: Option<&str>) -> Result<GateConfig> {
        let mut config = self.settings.clone();
        if let Some(name) = profile {
            let profile = self
                .profile(name)
                .cloned()
                .or_else(|| Profile::builtin(name))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown profile '{name}'. Available profiles: {}",
                        self.available_profiles().join(", ")
                    )
                })?;
            profile.apply(&mut config);
            debug!("Applied profile '{}'", profile.name);
        }
        Ok(config)
    }

    /// Names of the file's profiles followed by any builtin not shadowed
    pub fn available_profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.iter().map(|p| p.name.clone()).collect();
        for builtin in Profile::builtins() {
            if !names.contains(&builtin.name) {
                names.push(builtin.name);
            }
        }
        names
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut settings = GateConfig {
            tests: vec![
                TestSpec::shell(
                    "unit",
                    "cargo llvm-cov --lib --lcov --output-path \"$COVERAGE_GATE_TRACEFILE\"",
                )
                .with_description("Library unit tests"),
                TestSpec::shell(
                    "integration",
                    "cargo llvm-cov --test '*' --lcov --output-path \"$COVERAGE_GATE_TRACEFILE\"",
                )
                .with_description("Integration tests")
                .with_timeout(900),
            ],
            after_gate: Some(PostGateStep {
                name: "package".to_string(),
                command: vec![
                    "cargo".to_string(),
                    "build".to_string(),
                    "--release".to_string(),
                ],
                working_dir: None,
                timeout_secs: Some(1800),
            }),
            ..GateConfig::default()
        };
        settings.gate.rules = vec![
            GateRule::new(Counter::Line, DEFAULT_MINIMUM),
            GateRule::new(Counter::Line, crate::models::Ratio::new(1, 2).unwrap_or_default())
                .with_scope(RuleScope::Module),
        ];
        settings.report.json = ReportTarget::enabled();
        settings.report.csv = ReportTarget::enabled().with_output("reports/coverage.csv");

        Self {
            version: default_version(),
            settings,
            profiles: Profile::builtins(),
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ratio;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_example() {
        let config = ConfigFile::example();
        assert!(!config.settings.tests.is_empty());
        assert!(!config.profiles.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coverage-gate.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_file_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.settings.tests, config.settings.tests);
    }

    #[test]
    fn test_minimal_yaml() {
        let yaml = r#"
version: "1.0"
gate:
  rules:
    - minimum: "80%"
tests:
  - id: unit
    command: ["cargo", "test"]
"#;
        let config: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.settings.gate.rules[0].minimum, DEFAULT_MINIMUM);
        assert_eq!(config.settings.build_dir, PathBuf::from("build"));
        assert_eq!(config.settings.tests[0].id, "unit");
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let mut config = ConfigFile::default();
        config.settings.tests = vec![
            TestSpec::shell("unit", "true"),
            TestSpec::shell("unit", "true"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate test id"));
    }

    #[test]
    fn test_validate_shared_tracefile() {
        let mut config = ConfigFile::default();
        config.settings.tests = vec![
            TestSpec::shell("unit", "true").with_tracefile("lcov.info"),
            TestSpec::shell("integration", "true").with_tracefile("lcov.info"),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("same tracefile"));

        // ids differing only in punctuation get their own tracefiles
        config.settings.tests = vec![
            TestSpec::shell("api tasks", "true"),
            TestSpec::shell("api_tasks", "true"),
        ];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = ConfigFile::default();
        config.settings.tests = vec![TestSpec::new("unit", Vec::<String>::new())];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_version() {
        let config = ConfigFile {
            version: "9.9".to_string(),
            ..ConfigFile::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_rules() {
        let mut config = ConfigFile::default();
        config.settings.gate.rules.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_threshold_rejected_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "gate:\n  rules:\n    - minimum: 1.5\n").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn test_resolve_profile() {
        let config = ConfigFile::example();
        let resolved = config.resolve(Some("release")).unwrap();
        assert_eq!(
            resolved.gate.rules[0].minimum,
            "0.90".parse::<Ratio>().unwrap()
        );

        let base = config.resolve(None).unwrap();
        assert_eq!(base, config.settings);

        let err = config.resolve(Some("missing")).unwrap_err();
        assert!(err.to_string().contains("Unknown profile"));
    }

    #[test]
    fn test_resolve_builtin_profile_without_file() {
        let config = ConfigFile::default();
        let resolved = config.resolve(Some("release")).unwrap();
        assert_eq!(resolved.gate.rules[0].minimum, Ratio::new(9, 10).unwrap());
        assert_eq!(resolved.runner.env["APP_PROFILE"], "prod");

        let err = config.resolve(Some("staging")).unwrap_err();
        assert!(err.to_string().contains("test, release"));
    }

    #[test]
    fn test_file_profile_shadows_builtin() {
        let mut config = ConfigFile::default();
        config.profiles = vec![Profile::new("release").with_threshold(Ratio::ONE)];
        let resolved = config.resolve(Some("release")).unwrap();
        assert_eq!(resolved.gate.rules[0].minimum, Ratio::ONE);
        assert!(resolved.runner.env.is_empty());
        assert_eq!(config.available_profiles(), vec!["release", "test"]);
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
