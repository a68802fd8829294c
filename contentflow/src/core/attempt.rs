//! The stage attempt audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AttemptOutcome;

/// One invocation of a stage body.
///
/// Attempts form an append-only audit log used for diagnosis. They are
/// never read back by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempt {
    /// The run (or fan-out sub-run) the attempt belongs to.
    pub run_id: Uuid,
    /// The stage that was invoked.
    pub stage_id: String,
    /// 1-based attempt number within the stage.
    pub attempt_number: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// When the body was invoked.
    pub started_at: DateTime<Utc>,
    /// When the body returned.
    pub completed_at: DateTime<Utc>,
    /// Error message for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StageAttempt {
    /// Creates a new attempt record.
    #[must_use]
    pub fn new(
        run_id: Uuid,
        stage_id: impl Into<String>,
        attempt_number: u32,
        outcome: AttemptOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            stage_id: stage_id.into(),
            attempt_number,
            outcome,
            started_at,
            completed_at: Utc::now(),
            error_message: None,
        }
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Returns true if the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}
