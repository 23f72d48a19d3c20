//! Parallel test execution
//!
//! Runs test processes on a bounded pool of tokio tasks.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use super::TestRunner;
use crate::models::{TestExecutionRecord, TestSpec};

/// Parallel test executor
#[derive(Clone, Debug)]
pub struct ParallelExecutor {
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run tests with at most `max_concurrent` children alive at once.
    ///
    /// Records come back in input order; a worker task that dies is recorded
    /// as an errored test rather than dropped.
    pub async fn run(&self, runner: &TestRunner, specs: &[TestSpec]) -> Vec<TestExecutionRecord> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let (ids, handles): (Vec<_>, Vec<_>) = specs
            .iter()
            .cloned()
            .map(|spec| {
                let runner = runner.clone();
                let semaphore = semaphore.clone();
                let id = spec.id.clone();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    debug!("Starting parallel execution of {}", spec.id);
                    runner.run_test(&spec).await
                });
                (id, handle)
            })
            .unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| match joined {
                Ok(record) => record,
                Err(e) => {
                    error!("Worker for test {} failed: {}", id, e);
                    TestExecutionRecord::errored(id, 0, format!("worker task failed: {e}"))
                }
            })
            .collect()
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}
