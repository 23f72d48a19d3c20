//! Test execution runner
//!
//! Spawns each configured test as a child process, maps its exit status to an
//! outcome and collects the probes from the LCOV tracefile it wrote.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::ParallelExecutor;
use crate::config::GateConfig;
use crate::coverage::Tracefile;
use crate::models::{TestExecutionRecord, TestOutcome, TestSpec};
use crate::results::{ExecutionData, ExecutionStore};
use crate::utils::Timer;

/// Variable naming the tracefile a test must write
pub const TRACEFILE_ENV: &str = "COVERAGE_GATE_TRACEFILE";

/// Variable carrying the id of the running test
pub const TEST_ID_ENV: &str = "COVERAGE_GATE_TEST_ID";

/// Lines of stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 5;

/// Test runner for configured test cases
#[derive(Clone, Debug)]
pub struct TestRunner {
    config: Arc<GateConfig>,
    store: ExecutionStore,
}

impl TestRunner {
    /// Create a new test runner
    pub fn new(config: Arc<GateConfig>) -> Self {
        let store = ExecutionStore::for_build_dir(&config.build_dir);
        Self { config, store }
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Effective timeout for a test
    pub fn timeout_for(&self, spec: &TestSpec) -> Duration {
        Duration::from_secs(spec.timeout_secs.unwrap_or(self.config.runner.timeout_secs))
    }

    /// Run a single test case; failures are reported in the record, never returned
    pub async fn run_test(&self, spec: &TestSpec) -> TestExecutionRecord {
        if !spec.enabled {
            debug!("Skipping disabled test {}", spec.id);
            return TestExecutionRecord::skipped(&spec.id, "disabled in configuration");
        }

        let Some(program) = spec.program() else {
            return TestExecutionRecord::errored(&spec.id, 0, "empty command");
        };

        let tracefile = self.store.tracefile_for(spec);
        if let Err(e) = self.prepare_tracefile(&tracefile) {
            error!("Test {} could not prepare its tracefile: {:#}", spec.id, e);
            return TestExecutionRecord::errored(&spec.id, 0, format!("{e:#}"));
        }

        info!("Running {}", spec.id);
        debug!("{}: {}", spec.id, spec.command_line());

        let mut command = Command::new(program);
        command
            .args(spec.args())
            .envs(&self.config.runner.env)
            .envs(&spec.env)
            .env(TRACEFILE_ENV, &tracefile)
            .env(TEST_ID_ENV, &spec.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let timer = Timer::start(format!("test {}", spec.id));
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Test {} failed to start: {}", spec.id, e);
                return TestExecutionRecord::errored(
                    &spec.id,
                    timer.elapsed_ms(),
                    format!("failed to spawn '{program}': {e}"),
                );
            }
        };

        let limit = self.timeout_for(spec);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Test {} could not be awaited: {}", spec.id, e);
                return TestExecutionRecord::errored(&spec.id, timer.elapsed_ms(), e.to_string());
            }
            Err(_) => {
                // the child is dropped with the future and killed
                warn!("Test {} timed out after {}s", spec.id, limit.as_secs());
                return TestExecutionRecord::errored(
                    &spec.id,
                    timer.elapsed_ms(),
                    format!("timed out after {}s", limit.as_secs()),
                );
            }
        };
        let duration_ms = timer.elapsed_ms();

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{} stdout:\n{}", spec.id, stdout.trim_end());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);

        let record = if output.status.success() {
            TestExecutionRecord::passed(&spec.id, duration_ms)
        } else if let Some(code) = output.status.code() {
            let mut message = format!("exited with code {code}");
            let tail = stderr_tail(&stderr);
            if !tail.is_empty() {
                message.push_str(": ");
                message.push_str(&tail);
            }
            TestExecutionRecord::failed(&spec.id, duration_ms, message)
        } else {
            return TestExecutionRecord::errored(&spec.id, duration_ms, "terminated by signal");
        };

        let record = self.attach_coverage(record, &tracefile);
        info!("  {} {} ({}ms)", record.outcome.symbol(), spec.id, duration_ms);
        record
    }

    fn prepare_tracefile(&self, tracefile: &Path) -> Result<()> {
        if let Some(parent) = tracefile.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.store.clear_tracefile(tracefile)
    }

    fn attach_coverage(&self, record: TestExecutionRecord, tracefile: &Path) -> TestExecutionRecord {
        if !tracefile.exists() {
            warn!(
                "Test {} wrote no tracefile at {}; recording no coverage",
                record.test_id,
                tracefile.display()
            );
            return record;
        }

        match Tracefile::load(tracefile) {
            Ok(trace) => {
                let executed = trace.executed();
                let instrumented = trace.instrumented();
                debug!(
                    "{}: {} of {} probes executed",
                    record.test_id,
                    executed.len(),
                    instrumented.len()
                );
                record.with_coverage(executed, instrumented)
            }
            Err(e) => {
                error!("Test {} produced a malformed tracefile: {}", record.test_id, e);
                TestExecutionRecord::errored(
                    &record.test_id,
                    record.duration_ms,
                    format!("malformed tracefile: {e}"),
                )
            }
        }
    }

    /// Every enabled test must own its tracefile
    fn check_tracefiles(&self, tests: &[TestSpec]) -> Result<()> {
        let mut owners: HashMap<PathBuf, &str> = HashMap::new();
        for spec in tests.iter().filter(|t| t.enabled) {
            let path = self.store.tracefile_for(spec);
            if let Some(other) = owners.get(&path) {
                anyhow::bail!(
                    "Tests '{}' and '{}' write the same tracefile {}",
                    other,
                    spec.id,
                    path.display()
                );
            }
            owners.insert(path, &spec.id);
        }
        Ok(())
    }

    /// Run test cases sequentially
    pub async fn run_tests(&self, specs: &[TestSpec]) -> Vec<TestExecutionRecord> {
        let mut records = Vec::with_capacity(specs.len());
        for spec in specs {
            records.push(self.run_test(spec).await);
        }
        records
    }

    /// Run every configured test and persist the execution data
    pub async fn run_all(&self) -> Result<ExecutionData> {
        let tests = &self.config.tests;
        info!(
            "Running {} tests ({})",
            tests.len(),
            if self.config.runner.parallel {
                format!("parallel, max {}", self.config.runner.max_concurrent)
            } else {
                "sequential".to_string()
            }
        );

        self.check_tracefiles(tests)?;
        self.store.ensure_dir()?;
        let started_at = Utc::now();
        let timer = Timer::start("test run");

        let records = if self.config.runner.parallel {
            ParallelExecutor::new(self.config.runner.max_concurrent)
                .run(self, tests)
                .await
        } else {
            self.run_tests(tests).await
        };

        let data = ExecutionData::new(records, started_at);
        let summary = data.summary();
        info!(
            "Test run completed in {}ms - Pass: {}/{} ({:.1}%), failed: {}, errored: {}, skipped: {}",
            timer.stop().as_millis(),
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.failed,
            summary.errored,
            summary.skipped
        );
        for record in summary.failures() {
            if record.outcome == TestOutcome::Errored {
                error!("{}", record);
            } else {
                warn!("{}", record);
            }
        }

        self.store.save(&data)?;
        Ok(data)
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

#[cfg(all(test, unix))]
mod unit_tests {
    use super::*;
    use crate::models::Probe;
    use std::collections::BTreeSet;
    use tempfile::{tempdir, TempDir};

    const LCOV: &str = "SF:src/lib.rs\nDA:1,1\nDA:2,0\nend_of_record\n";

    fn runner(tests: Vec<TestSpec>) -> (TempDir, TestRunner) {
        let dir = tempdir().unwrap();
        let config = GateConfig {
            build_dir: dir.path().to_path_buf(),
            tests,
            ..GateConfig::default()
        };
        (dir, TestRunner::new(Arc::new(config)))
    }

    fn writes_lcov(id: &str, exit: i32) -> TestSpec {
        TestSpec::shell(
            id,
            format!("printf '{}' > \"$COVERAGE_GATE_TRACEFILE\"; exit {exit}", LCOV.replace('\n', "\\n")),
        )
    }

    #[tokio::test]
    async fn test_passing_test_collects_coverage() {
        let (_dir, runner) = runner(vec![]);
        let record = runner.run_test(&writes_lcov("unit", 0)).await;

        assert_eq!(record.outcome, TestOutcome::Passed);
        assert!(record.executed.contains(&Probe::line("src/lib.rs", 1)));
        assert_eq!(record.instrumented.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_test_keeps_coverage() {
        let (_dir, runner) = runner(vec![]);
        let record = runner.run_test(&writes_lcov("unit", 3)).await;

        assert_eq!(record.outcome, TestOutcome::Failed);
        assert!(record.message.unwrap().contains("code 3"));
        assert_eq!(record.executed.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_message_includes_stderr() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("unit", "echo 'assertion failed' >&2; exit 1");
        let record = runner.run_test(&spec).await;

        assert_eq!(record.outcome, TestOutcome::Failed);
        assert!(record.message.unwrap().contains("assertion failed"));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let (_dir, runner) = runner(vec![]);
        let workdir = tempdir().unwrap();
        std::fs::write(workdir.path().join("fixture.txt"), "data").unwrap();
        let spec = TestSpec::shell("fixture", "test -f fixture.txt")
            .with_working_dir(workdir.path());

        let record = runner.run_test(&spec).await;
        assert_eq!(record.outcome, TestOutcome::Passed);
    }

    #[tokio::test]
    async fn test_missing_tracefile_is_empty_coverage() {
        let (_dir, runner) = runner(vec![]);
        let record = runner.run_test(&TestSpec::shell("quiet", "true")).await;

        assert_eq!(record.outcome, TestOutcome::Passed);
        assert!(record.executed.is_empty());
        assert!(record.instrumented.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_tracefile_is_error() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("bad", "echo 'DA:1,1' > \"$COVERAGE_GATE_TRACEFILE\"");
        let record = runner.run_test(&spec).await;

        assert_eq!(record.outcome, TestOutcome::Errored);
        assert!(record.message.unwrap().contains("malformed tracefile"));
    }

    #[tokio::test]
    async fn test_stale_tracefile_removed() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("stale", "true");
        let tracefile = runner.store().tracefile_for(&spec);
        std::fs::create_dir_all(tracefile.parent().unwrap()).unwrap();
        std::fs::write(&tracefile, LCOV).unwrap();

        let record = runner.run_test(&spec).await;
        assert!(record.instrumented.is_empty());
        assert!(!tracefile.exists());
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("slow", "sleep 10").with_timeout(1);
        let record = runner.run_test(&spec).await;

        assert_eq!(record.outcome, TestOutcome::Errored);
        assert!(record.message.unwrap().contains("timed out"));
        assert!(record.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn test_signal_is_error() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("killed", "kill -9 $$");
        let record = runner.run_test(&spec).await;
        assert_eq!(record.outcome, TestOutcome::Errored);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::new("missing", ["/nonexistent/coverage-gate-test-binary"]);
        let record = runner.run_test(&spec).await;

        assert_eq!(record.outcome, TestOutcome::Errored);
        assert!(record.message.unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_disabled_is_skipped() {
        let (_dir, runner) = runner(vec![]);
        let record = runner.run_test(&TestSpec::shell("off", "exit 1").disabled()).await;
        assert_eq!(record.outcome, TestOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_environment_passed() {
        let dir = tempdir().unwrap();
        let mut config = GateConfig {
            build_dir: dir.path().to_path_buf(),
            ..GateConfig::default()
        };
        config
            .runner
            .env
            .insert("APP_PROFILE".to_string(), "test".to_string());
        let runner = TestRunner::new(Arc::new(config));

        let spec = TestSpec::shell(
            "env",
            "[ \"$APP_PROFILE\" = test ] && [ \"$COVERAGE_GATE_TEST_ID\" = env ] && [ \"$EXTRA\" = 1 ]",
        )
        .with_env("EXTRA", "1");
        let record = runner.run_test(&spec).await;
        assert_eq!(record.outcome, TestOutcome::Passed);
    }

    #[tokio::test]
    async fn test_run_all_persists_sorted_records() {
        let (_dir, runner) = runner(vec![
            writes_lcov("b", 1),
            writes_lcov("a", 0),
            TestSpec::shell("c", "true").disabled(),
        ]);

        let data = runner.run_all().await.unwrap();
        let ids: Vec<_> = data.records.iter().map(|r| r.test_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let loaded = runner.store().load().unwrap();
        assert_eq!(loaded, data);
    }

    #[tokio::test]
    async fn test_parallel_similar_ids_keep_own_coverage() {
        let dir = tempdir().unwrap();
        let writes = |id: &str, file: &str| {
            TestSpec::shell(
                id,
                format!("printf 'SF:{file}\\nDA:1,1\\nend_of_record\\n' > \"$COVERAGE_GATE_TRACEFILE\""),
            )
        };
        let mut config = GateConfig {
            build_dir: dir.path().to_path_buf(),
            tests: vec![writes("api tasks", "a.rs"), writes("api_tasks", "b.rs")],
            ..GateConfig::default()
        };
        config.runner.parallel = true;
        let runner = TestRunner::new(Arc::new(config));

        let data = runner.run_all().await.unwrap();
        let executed = |id: &str| {
            data.records
                .iter()
                .find(|r| r.test_id == id)
                .map(|r| r.executed.clone())
                .unwrap()
        };
        assert_eq!(executed("api tasks"), BTreeSet::from([Probe::line("a.rs", 1)]));
        assert_eq!(executed("api_tasks"), BTreeSet::from([Probe::line("b.rs", 1)]));
    }

    #[tokio::test]
    async fn test_shared_fixed_tracefile_rejected() {
        let dir = tempdir().unwrap();
        let shared = dir.path().join("lcov.info");
        let (_build, runner) = runner(vec![
            TestSpec::shell("unit", "true").with_tracefile(&shared),
            TestSpec::shell("integration", "true").with_tracefile(&shared),
        ]);

        let err = runner.run_all().await.unwrap_err();
        assert!(err.to_string().contains("same tracefile"));
    }

    #[test]
    fn test_timeout_for() {
        let (_dir, runner) = runner(vec![]);
        let spec = TestSpec::shell("t", "true");
        assert_eq!(runner.timeout_for(&spec), Duration::from_secs(600));
        assert_eq!(
            runner.timeout_for(&spec.with_timeout(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_stderr_tail() {
        let stderr = "1\n2\n\n3\n4\n5\n6\n";
        assert_eq!(stderr_tail(stderr), "2 | 3 | 4 | 5 | 6");
        assert_eq!(stderr_tail(""), "");
    }
}
