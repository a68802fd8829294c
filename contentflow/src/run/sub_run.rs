//! Fan-out sub-run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RunContext;
use crate::core::RunStatus;

/// The record of one fan-out unit's inner pipeline execution.
///
/// Each unit is persisted on its own, so a failed unit never hides the
/// results of the units that ran before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRunRecord {
    /// The sub-run id.
    pub id: Uuid,
    /// The run that owns the fan-out stage.
    pub parent_run_id: Uuid,
    /// The fan-out stage id.
    pub stage_id: String,
    /// Position of the unit within the fan-out set.
    pub unit_index: usize,
    /// Stable key of the unit (e.g. a lesson id).
    pub unit_key: String,
    /// Terminal status of the sub-run.
    pub status: RunStatus,
    /// Number of inner stages that completed.
    pub stages_completed: usize,
    /// Inner context at the end of the sub-run.
    pub context: RunContext,
    /// Failure message, if the unit failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the unit started.
    pub started_at: DateTime<Utc>,
    /// When the unit finished.
    pub completed_at: DateTime<Utc>,
}

impl SubRunRecord {
    /// Returns true if the unit succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
