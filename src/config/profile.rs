//! Named configuration profiles
//!
//! A profile overlays environment variables (for example a test datasource
//! selection) and an optional threshold onto the base configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::GateConfig;
use crate::models::Ratio;

/// Configuration overlay selected with `--profile`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name
    pub name: String,

    /// Description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Environment variables added for every test
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Project-wide line minimum override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Ratio>,

    /// Build directory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<PathBuf>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            env: BTreeMap::new(),
            threshold: None,
            build_dir: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_threshold(mut self, threshold: Ratio) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// In-memory test datasource
    pub fn test() -> Self {
        Self::new("test")
            .with_description("Tests against the embedded test datasource")
            .with_env("APP_PROFILE", "test")
    }

    /// Stricter gate for release builds
    pub fn release() -> Self {
        let profile = Self::new("release")
            .with_description("Release verification with a stricter line minimum")
            .with_env("APP_PROFILE", "prod");
        match Ratio::new(9, 10) {
            Some(minimum) => profile.with_threshold(minimum),
            None => profile,
        }
    }

    /// Profiles available without a configuration file
    pub fn builtins() -> Vec<Self> {
        vec![Self::test(), Self::release()]
    }

    pub fn builtin(name: &str) -> Option<Self> {
        Self::builtins().into_iter().find(|p| p.name == name)
    }

    /// Apply this overlay; profile values win over the base configuration
    pub fn apply(&self, config: &mut GateConfig) {
        config
            .runner
            .env
            .extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(threshold) = self.threshold {
            config.gate.set_threshold(threshold);
        }
        if let Some(build_dir) = &self.build_dir {
            config.build_dir = build_dir.clone();
        }
    }
}
