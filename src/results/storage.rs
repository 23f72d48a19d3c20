//! Execution data storage
//!
//! Persists the raw instrumentation data of a test run as JSON so that report
//! generation and verification can run as separate steps.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::coverage::AggregationError;
use crate::models::{TestExecutionRecord, TestRunSummary, TestSpec};

/// Current execution data format version
pub const EXECUTION_DATA_VERSION: &str = "1";

/// Directory under the build dir holding execution data
pub const DATA_DIR: &str = "coverage-data";

const EXEC_FILE: &str = "exec.json";
const TRACES_DIR: &str = "traces";

/// Raw instrumentation data of one test run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionData {
    /// Format version
    pub version: String,

    /// Unique run ID
    pub run_id: String,

    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run completed
    pub completed_at: DateTime<Utc>,

    /// Records sorted by test id
    pub records: Vec<TestExecutionRecord>,
}

impl ExecutionData {
    pub fn new(mut records: Vec<TestExecutionRecord>, started_at: DateTime<Utc>) -> Self {
        records.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        Self {
            version: EXECUTION_DATA_VERSION.to_string(),
            run_id: generate_run_id(),
            started_at,
            completed_at: Utc::now(),
            records,
        }
    }

    pub fn summary(&self) -> TestRunSummary {
        TestRunSummary::new(self.records.clone())
    }
}

/// Location of execution data and per-test tracefiles
#[derive(Clone, Debug)]
pub struct ExecutionStore {
    base_dir: PathBuf,
}

impl ExecutionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store rooted at `<build_dir>/coverage-data`
    pub fn for_build_dir(build_dir: impl AsRef<Path>) -> Self {
        Self::new(build_dir.as_ref().join(DATA_DIR))
    }

    pub fn exec_path(&self) -> PathBuf {
        self.base_dir.join(EXEC_FILE)
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.base_dir.join(TRACES_DIR)
    }

    /// Tracefile location for a test
    pub fn tracefile_for(&self, spec: &TestSpec) -> PathBuf {
        match &spec.tracefile {
            Some(path) => path.clone(),
            None => self.traces_dir().join(format!("{}.info", spec.file_stem())),
        }
    }

    /// Ensure the storage directories exist
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(self.traces_dir()).with_context(|| {
            format!("Failed to create directory: {}", self.traces_dir().display())
        })?;
        Ok(())
    }

    /// Remove a stale tracefile before a test runs
    pub fn clear_tracefile(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed stale tracefile {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove stale tracefile: {}", path.display())),
        }
    }

    /// Save execution data, replacing any previous run
    pub fn save(&self, data: &ExecutionData) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.exec_path();
        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, data)
                .context("Failed to write execution data")?;
            writer.flush().context("Failed to flush execution data")?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move execution data to {}", path.display()))?;

        info!("Saved execution data to {}", path.display());
        Ok(path)
    }

    /// Load execution data; missing or corrupt data is an aggregation failure
    pub fn load(&self) -> Result<ExecutionData, AggregationError> {
        let path = self.exec_path();
        let file = File::open(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                AggregationError::MissingExecutionData(path.clone())
            } else {
                AggregationError::Unreadable {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        let data: ExecutionData = serde_json::from_reader(BufReader::new(file)).map_err(
            |source| AggregationError::Corrupt {
                path: path.clone(),
                source,
            },
        )?;

        if data.version != EXECUTION_DATA_VERSION {
            return Err(AggregationError::UnsupportedVersion {
                path,
                found: data.version,
            });
        }

        debug!(
            "Loaded {} execution records from {}",
            data.records.len(),
            path.display()
        );
        Ok(data)
    }
}

/// Generate a unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}
