//! Test case specifications
//!
//! A test is an external command that may write an LCOV tracefile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One configured test case
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique test identifier
    pub id: String,

    /// Program followed by its arguments
    pub command: Vec<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for this test
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Fixed tracefile location written by the test itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracefile: Option<PathBuf>,

    /// Per-test timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Disabled tests are recorded as skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TestSpec {
    pub fn new<I, S>(id: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            command: command.into_iter().map(Into::into).collect(),
            description: String::new(),
            working_dir: None,
            env: BTreeMap::new(),
            tracefile: None,
            timeout_secs: None,
            enabled: true,
        }
    }

    /// Convenience constructor for `sh -c <script>`
    pub fn shell(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(id, ["sh".to_string(), "-c".to_string(), script.into()])
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or(&[])
    }

    /// Command line for display
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// File-name-safe form of the id
    ///
    /// Lowercase ASCII letters, digits, `-` and `.` are kept; every other byte
    /// becomes `_xx` (hex), so distinct ids never share a stem, even on
    /// case-insensitive filesystems.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.id.len());
        for byte in self.id.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'.' {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("_{byte:02x}"));
            }
        }
        stem
    }
}

#[cfg(test)]
impl TestSpec {
    pub fn with_tracefile(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracefile = Some(path.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}
