//! Pipeline lifecycle

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage the pipeline has reached; `Gated` is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Aggregating,
    Gated { passed: bool },
}

impl PipelineState {
    /// Whether `next` may follow this state.
    ///
    /// `Idle -> Aggregating` covers report and verify runs over persisted data.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        matches!(
            (self, next),
            (PipelineState::Idle, PipelineState::Running)
                | (PipelineState::Idle, PipelineState::Aggregating)
                | (PipelineState::Running, PipelineState::Aggregating)
                | (PipelineState::Aggregating, PipelineState::Gated { .. })
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Aggregating => write!(f, "aggregating"),
            PipelineState::Gated { passed: true } => write!(f, "gated (passed)"),
            PipelineState::Gated { passed: false } => write!(f, "gated (failed)"),
        }
    }
}

/// A stage was invoked out of order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot move pipeline from {from} to {to}")]
pub struct StageOrderError {
    pub from: PipelineState,
    pub to: PipelineState,
}
