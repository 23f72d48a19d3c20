//! Build pipeline
//!
//! Drives one invocation through `Idle -> Running -> Aggregating -> Gated`:
//! tests run and persist their execution data, the aggregator merges it into
//! a report (artifacts are written even when tests failed), the gate decides,
//! and the post-gate step runs only when tests and gate both passed.

mod result;
mod state;

pub use result::{BuildResult, PostGateOutcome};
pub use state::{PipelineState, StageOrderError};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::coverage::{CoverageAggregator, CoverageReport, GateEvaluation};
use crate::executor::TestRunner;
use crate::models::DEFAULT_MINIMUM;
use crate::results::{ExecutionData, ExecutionStore, ReportGenerator};
use crate::utils::Stopwatch;

/// One pipeline invocation over a frozen configuration
pub struct Pipeline {
    config: Arc<GateConfig>,
    state: PipelineState,
    transitions: Vec<PipelineState>,
    stopwatch: Stopwatch,
}

impl Pipeline {
    pub fn new(config: Arc<GateConfig>) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
            stopwatch: Stopwatch::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), StageOrderError> {
        if !self.state.can_advance_to(next) {
            return Err(StageOrderError {
                from: self.state,
                to: next,
            });
        }
        info!("Pipeline: {} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn store(&self) -> ExecutionStore {
        ExecutionStore::for_build_dir(&self.config.build_dir)
    }

    /// Run every configured test and persist the execution data
    pub async fn run_tests(&mut self) -> Result<ExecutionData> {
        self.advance(PipelineState::Running)?;
        let data = TestRunner::new(self.config.clone())
            .run_all()
            .await
            .context("Failed to run tests")?;
        self.stopwatch.lap("tests");
        Ok(data)
    }

    /// Merge execution records (plus the configured baseline) into a report
    pub fn aggregate(&mut self, data: &ExecutionData) -> Result<CoverageReport> {
        self.advance(PipelineState::Aggregating)?;
        let baseline: Vec<PathBuf> = self
            .config
            .baseline
            .iter()
            .map(|p| self.config.build_path(p))
            .collect();
        let aggregator = CoverageAggregator::load_baseline(&baseline)?;
        if !baseline.is_empty() {
            info!(
                "Baseline declares {} instrumentable units",
                aggregator.baseline_len()
            );
        }
        let report = aggregator.aggregate(&data.records);
        if report.is_empty() {
            warn!("No coverage data was recorded; every ratio is empty");
        }
        self.stopwatch.lap("aggregate");
        Ok(report)
    }

    /// Render the enabled report artifacts
    pub fn generate_reports(
        &mut self,
        data: &ExecutionData,
        report: &CoverageReport,
    ) -> Result<Vec<PathBuf>> {
        let highlight = self
            .config
            .gate
            .rules
            .first()
            .map(|r| r.minimum)
            .unwrap_or(DEFAULT_MINIMUM);
        let paths = ReportGenerator::new(&self.config.build_dir, self.config.report.clone())
            .with_highlight(highlight)
            .generate(data, report)
            .context("Failed to write coverage reports")?;
        self.stopwatch.lap("reports");
        Ok(paths)
    }

    /// Evaluate the coverage rules; terminal
    pub fn gate(&mut self, report: &CoverageReport) -> Result<GateEvaluation> {
        if self.state != PipelineState::Aggregating {
            return Err(StageOrderError {
                from: self.state,
                to: PipelineState::Gated { passed: false },
            }
            .into());
        }

        let evaluation = self.config.gate.gate().evaluate(report);
        for result in &evaluation.results {
            if result.passed {
                info!("{}", result.message());
            } else {
                warn!("{}", result.message());
            }
        }

        self.advance(PipelineState::Gated {
            passed: evaluation.passed(),
        })?;
        self.stopwatch.lap("gate");
        Ok(evaluation)
    }

    /// Run the configured post-gate step, if any
    pub async fn run_post_gate(&self) -> Result<Option<PostGateOutcome>> {
        let Some(step) = &self.config.after_gate else {
            return Ok(None);
        };
        if self.state != (PipelineState::Gated { passed: true }) {
            anyhow::bail!(
                "post-gate step '{}' requires a passed gate (pipeline is {})",
                step.name,
                self.state
            );
        }

        let Some((program, args)) = step.command.split_first() else {
            anyhow::bail!("post-gate step '{}' has an empty command", step.name);
        };

        info!("Running post-gate step '{}'", step.name);
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.config.runner.env)
            .kill_on_drop(true);
        if let Some(dir) = &step.working_dir {
            command.current_dir(dir);
        }

        let failed = |message: String| PostGateOutcome {
            name: step.name.clone(),
            success: false,
            exit_code: None,
            message: Some(message),
        };
        let limit = Duration::from_secs(
            step.timeout_secs
                .unwrap_or(self.config.runner.timeout_secs)
                .max(1),
        );
        let outcome = match command.spawn() {
            Err(e) => failed(format!("failed to spawn '{program}': {e}")),
            Ok(mut child) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(Ok(status)) => PostGateOutcome {
                    name: step.name.clone(),
                    success: status.success(),
                    exit_code: status.code(),
                    message: (!status.success()).then(|| format!("exited with {status}")),
                },
                Ok(Err(e)) => failed(format!("could not be awaited: {e}")),
                // dropping the child kills it
                Err(_) => failed(format!("timed out after {}s", limit.as_secs())),
            },
        };

        if outcome.success {
            info!("Post-gate step '{}' succeeded", step.name);
        } else {
            warn!(
                "Post-gate step '{}' failed: {}",
                step.name,
                outcome.message.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(Some(outcome))
    }

    fn finish(&self, mut result: BuildResult) -> BuildResult {
        result.state = self.state();
        let path: Vec<String> = self.transitions().iter().map(|s| s.to_string()).collect();
        debug!("Pipeline path: {}", path.join(" -> "));
        debug!("Stage timings:\n{}", self.stopwatch.format());
        result
    }

    /// Full build: tests, reports, gate, post-gate step
    pub async fn check(mut self) -> Result<BuildResult> {
        let data = self.run_tests().await?;
        let summary = data.summary();
        let report = self.aggregate(&data)?;
        let reports = self.generate_reports(&data, &report)?;
        let evaluation = self.gate(&report)?;

        let mut result = BuildResult::new(self.state);
        result.tests = Some(summary);
        result.coverage = Some(report);
        result.gate = Some(evaluation);
        result.reports = reports;

        if !result.success() {
            if let Some(step) = &self.config.after_gate {
                info!("Skipping post-gate step '{}'", step.name);
            }
        } else {
            result.post_gate = self.run_post_gate().await?;
        }

        Ok(self.finish(result))
    }

    /// Run tests, then render reports whatever the outcome
    pub async fn test(mut self) -> Result<BuildResult> {
        let data = self.run_tests().await?;
        let report = self.aggregate(&data)?;
        let reports = self.generate_reports(&data, &report)?;

        let mut result = BuildResult::new(self.state);
        result.tests = Some(data.summary());
        result.coverage = Some(report);
        result.reports = reports;
        Ok(self.finish(result))
    }

    /// Render reports from persisted execution data
    pub fn report(mut self) -> Result<BuildResult> {
        let data = self.store().load()?;
        let report = self.aggregate(&data)?;
        let reports = self.generate_reports(&data, &report)?;

        let mut result = BuildResult::new(self.state);
        result.coverage = Some(report);
        result.reports = reports;
        Ok(self.finish(result))
    }

    /// Evaluate the gate over persisted execution data without writing artifacts
    pub fn verify(mut self) -> Result<BuildResult> {
        let data = self.store().load()?;
        let report = self.aggregate(&data)?;
        let evaluation = self.gate(&report)?;

        let mut result = BuildResult::new(self.state);
        result.coverage = Some(report);
        result.gate = Some(evaluation);
        Ok(self.finish(result))
    }
}
