//! Run identity for tracking pipeline executions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::OwnerRef;

/// Identifies the run a stage is executing in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The run (or fan-out sub-run) id.
    pub run_id: Uuid,
    /// The definition being executed.
    pub pipeline_id: String,
    /// The owner entity the run drives.
    pub owner: OwnerRef,
    /// The enclosing run, for fan-out sub-runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
}

impl RunIdentity {
    /// Creates a new run identity.
    #[must_use]
    pub fn new(run_id: Uuid, pipeline_id: impl Into<String>, owner: OwnerRef) -> Self {
        Self {
            run_id,
            pipeline_id: pipeline_id.into(),
            owner,
            parent_run_id: None,
        }
    }

    /// Derives the identity of a fan-out sub-run.
    #[must_use]
    pub fn child(&self, sub_run_id: Uuid, pipeline_id: impl Into<String>) -> Self {
        Self {
            run_id: sub_run_id,
            pipeline_id: pipeline_id.into(),
            owner: self.owner,
            parent_run_id: Some(self.run_id),
        }
    }

    /// Returns true for fan-out sub-runs.
    #[must_use]
    pub const fn is_sub_run(&self) -> bool {
        self.parent_run_id.is_some()
    }
}
