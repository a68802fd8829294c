//! Span constructors.

use tracing::{info_span, Span};

use crate::context::RunIdentity;
use crate::run::PipelineRun;

/// Span covering one run from first `advance()` to its terminal state.
#[must_use]
pub fn run_span(run: &PipelineRun) -> Span {
    info_span!(
        "pipeline_run",
        run_id = %run.id(),
        pipeline_id = %run.pipeline_id(),
        owner = %run.owner(),
    )
}

/// Span covering every attempt of one stage.
#[must_use]
pub fn stage_span(identity: &RunIdentity, stage_id: &str) -> Span {
    info_span!(
        "stage",
        run_id = %identity.run_id,
        pipeline_id = %identity.pipeline_id,
        stage_id = %stage_id,
        sub_run = identity.is_sub_run(),
    )
}

/// Span covering one fan-out unit.
#[must_use]
pub fn fanout_unit_span(parent: &RunIdentity, stage_id: &str, unit_index: usize, unit_key: &str) -> Span {
    info_span!(
        "fanout_unit",
        parent_run_id = %parent.run_id,
        stage_id = %stage_id,
        unit_index,
        unit_key = %unit_key,
    )
}
