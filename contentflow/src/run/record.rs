//! The `PipelineRun` state machine record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OwnerRef;
use crate::context::{RunContext, RunIdentity};
use crate::core::{RunStatus, StageOutput};
use crate::errors::{ContentflowError, TransitionError};

/// One execution of a pipeline definition against one owner entity.
///
/// Fields are only changed through the transition methods below, which
/// enforce:
/// - `current_stage_index` moves forward by exactly one per completed stage
/// - `progress_percent` never decreases
/// - a terminal run accepts no further transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    id: Uuid,
    pipeline_id: String,
    owner: OwnerRef,
    status: RunStatus,
    current_stage_index: usize,
    progress_percent: u8,
    context: RunContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a pending run with a seeded context.
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, owner: OwnerRef, context: RunContext) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            pipeline_id: pipeline_id.into(),
            owner,
            status: RunStatus::Pending,
            current_stage_index: 0,
            progress_percent: 0,
            context,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the pipeline definition id.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Returns the owner entity.
    #[must_use]
    pub const fn owner(&self) -> OwnerRef {
        self.owner
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns the index of the next stage to run.
    #[must_use]
    pub const fn current_stage_index(&self) -> usize {
        self.current_stage_index
    }

    /// Returns the persisted progress.
    #[must_use]
    pub const fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    /// Returns the accumulated context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Returns the last error, if the run failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update time.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the identity stage bodies see.
    #[must_use]
    pub fn identity(&self) -> RunIdentity {
        RunIdentity::new(self.id, &self.pipeline_id, self.owner)
    }

    /// Returns true once the run has succeeded or failed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `pending → running`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the run is pending.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        if self.status != RunStatus::Pending {
            return Err(self.refuse("begin", "only pending runs can begin"));
        }
        self.status = RunStatus::Running;
        self.touch();
        Ok(())
    }

    /// Merges the output of the stage at `stage_index` and advances past it.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not running, `stage_index` is not the
    /// current index, or the output key was already written.
    pub fn record_stage_success(
        &mut self,
        stage_index: usize,
        output_key: &str,
        output: StageOutput,
        progress_percent: u8,
    ) -> Result<(), ContentflowError> {
        self.check_advance("record stage success", stage_index)?;
        self.context.insert(output_key, output)?;
        self.step(progress_percent);
        Ok(())
    }

    /// Advances past a stage whose condition did not hold.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the run is not running or `stage_index`
    /// is not the current index.
    pub fn record_stage_skipped(&mut self, stage_index: usize, progress_percent: u8) -> Result<(), TransitionError> {
        self.check_advance("skip stage", stage_index)?;
        self.step(progress_percent);
        Ok(())
    }

    /// `running → succeeded`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the run is running and every one of
    /// `stage_count` stages has completed.
    pub fn succeed(&mut self, stage_count: usize) -> Result<(), TransitionError> {
        if self.status != RunStatus::Running {
            return Err(self.refuse("succeed", "only running runs can succeed"));
        }
        if self.current_stage_index != stage_count {
            return Err(self.refuse(
                "succeed",
                format!("{} of {stage_count} stages completed", self.current_stage_index),
            ));
        }
        self.status = RunStatus::Succeeded;
        self.progress_percent = 100;
        self.touch();
        Ok(())
    }

    /// `pending | running → failed`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the run is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(self.refuse("fail", "terminal runs are immutable"));
        }
        self.status = RunStatus::Failed;
        self.last_error = Some(message.into());
        self.touch();
        Ok(())
    }

    fn check_advance(&self, action: &str, stage_index: usize) -> Result<(), TransitionError> {
        if self.status != RunStatus::Running {
            return Err(self.refuse(action, "stages only complete while running"));
        }
        if stage_index != self.current_stage_index {
            return Err(self.refuse(
                action,
                format!("stage {stage_index} is not the current stage {}", self.current_stage_index),
            ));
        }
        Ok(())
    }

    fn step(&mut self, progress_percent: u8) {
        self.current_stage_index += 1;
        self.progress_percent = self.progress_percent.max(progress_percent.min(100));
        self.touch();
    }

    fn refuse(&self, action: &str, reason: impl Into<String>) -> TransitionError {
        TransitionError::new(self.id, self.status, action, reason)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_run() -> PipelineRun {
        let mut run = PipelineRun::new("p", OwnerRef::Document(Uuid::new_v4()), RunContext::new());
        run.begin().unwrap();
        run
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new("p", OwnerRef::Document(Uuid::new_v4()), RunContext::new());
        assert_eq!(run.status(), RunStatus::Pending);
        assert_eq!(run.current_stage_index(), 0);
        assert_eq!(run.progress_percent(), 0);
        assert!(run.last_error().is_none());
    }

    #[test]
    fn test_begin_only_once() {
        let mut run = running_run();
        assert!(run.begin().is_err());
    }

    #[test]
    fn test_success_advances_by_one() {
        let mut run = running_run();
        run.record_stage_success(0, "a", StageOutput::new(json!(1)), 50).unwrap();
        assert_eq!(run.current_stage_index(), 1);
        assert_eq!(run.progress_percent(), 50);
        assert_eq!(run.context().get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_out_of_order_success_rejected() {
        let mut run = running_run();
        let err = run.record_stage_success(1, "b", StageOutput::empty(), 50).unwrap_err();
        assert!(matches!(err, ContentflowError::InvalidTransition(_)));
        assert_eq!(run.current_stage_index(), 0);
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut run = running_run();
        run.record_stage_success(0, "a", StageOutput::empty(), 60).unwrap();
        run.record_stage_skipped(1, 40).unwrap();
        assert_eq!(run.progress_percent(), 60);
    }

    #[test]
    fn test_succeed_requires_all_stages() {
        let mut run = running_run();
        assert!(run.succeed(1).is_err());
        run.record_stage_success(0, "a", StageOutput::empty(), 100).unwrap();
        run.succeed(1).unwrap();
        assert_eq!(run.status(), RunStatus::Succeeded);
    }

    #[test]
    fn test_terminal_run_is_immutable() {
        let mut run = running_run();
        run.fail("boom").unwrap();
        let frozen = run.clone();

        assert!(run.fail("again").is_err());
        assert!(run.record_stage_success(0, "a", StageOutput::empty(), 10).is_err());
        assert!(run.record_stage_skipped(0, 10).is_err());
        assert!(run.succeed(0).is_err());
        assert_eq!(run, frozen);
    }

    #[test]
    fn test_run_roundtrips_through_json() {
        let mut run = running_run();
        run.record_stage_success(0, "a", StageOutput::new(json!({"x": 1})), 25).unwrap();
        let back: PipelineRun = serde_json::from_str(&serde_json::to_string(&run).unwrap()).unwrap();
        assert_eq!(back, run);
    }
}
