//! Lifecycle events emitted by the orchestrator.
//!
//! Sinks are injected into the coordinator, executor and fan-out driver;
//! there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde_json::{json, Value};

use crate::run::PipelineRun;

/// Event type names.
pub mod types {
    /// A run was created and its owner claimed.
    pub const RUN_CREATED: &str = "run.created";
    /// A run left `pending`.
    pub const RUN_STARTED: &str = "run.started";
    /// A stage completed or was skipped and progress was persisted.
    pub const RUN_PROGRESS: &str = "run.progress";
    /// A run succeeded.
    pub const RUN_SUCCEEDED: &str = "run.succeeded";
    /// A run failed.
    pub const RUN_FAILED: &str = "run.failed";
    /// A stage body is about to be invoked for the first time.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage produced its output.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A conditional stage did not run.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage attempt failed transiently and will be retried.
    pub const STAGE_RETRYING: &str = "stage.retrying";
    /// A stage failed terminally.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A fan-out unit finished.
    pub const FANOUT_UNIT_COMPLETED: &str = "fanout.unit_completed";
    /// A fan-out unit failed.
    pub const FANOUT_UNIT_FAILED: &str = "fanout.unit_failed";
}

/// Standard payload describing a run's visible state.
#[must_use]
pub fn run_payload(run: &PipelineRun) -> Value {
    json!({
        "run_id": run.id().to_string(),
        "pipeline_id": run.pipeline_id(),
        "owner": run.owner().to_string(),
        "status": run.status().to_string(),
        "current_stage_index": run.current_stage_index(),
        "progress_percent": run.progress_percent(),
    })
}
