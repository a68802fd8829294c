//! The staged-pipeline engine.
//!
//! This module provides:
//! - Stage specifications and validated pipeline definitions
//! - The stage executor and its retry policies
//! - The run coordinator and failure handler
//! - Fan-out over an inner pipeline

mod coordinator;
mod definition;
mod executor;
mod failure;
mod fanout;
mod progress;
mod retry;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use coordinator::{AdvanceOutcome, RunCoordinator};
pub use definition::{PipelineBuilder, PipelineDefinition};
pub use executor::StageExecutor;
pub use failure::{truncate_message, FailureHandler, RunFailure, DEFAULT_ERROR_MESSAGE_LIMIT};
pub use fanout::{FanOutDriver, FanOutError, FanOutPlan, FanOutPolicy, FanOutReport, FanOutStage, FanOutUnit};
pub use progress::ProgressReporter;
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy};
pub use spec::{StageCondition, StageSpec};
