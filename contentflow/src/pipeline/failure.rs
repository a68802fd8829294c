//! Failure handling: freezes a run and its owner in the failed state.

use std::sync::Arc;
use tracing::{error, warn};

use crate::core::RunStatus;
use crate::errors::{ContentflowError, MissingInputError, StageFailure};
use crate::events::{run_payload, types, EventSink};
use crate::run::{OwnerState, PipelineRun, RunStore};

/// Default cap on error messages shown to users.
pub const DEFAULT_ERROR_MESSAGE_LIMIT: usize = 500;

/// Why a run is failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// Declared inputs were missing: a definition bug.
    Validation(MissingInputError),
    /// A stage exhausted its retries or failed fatally.
    Stage(StageFailure),
}

impl RunFailure {
    /// Returns the stage the failure happened at.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        match self {
            Self::Validation(e) => &e.stage_id,
            Self::Stage(f) => &f.stage_id,
        }
    }

    /// Returns the message recorded on the run and its owner.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Stage(f) => f.last_error.clone(),
        }
    }

    /// Returns the log/event label for the failure kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Stage(_) => "stage_failure",
        }
    }
}

/// Truncates `message` to at most `limit` characters, marking the cut.
#[must_use]
pub fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Moves runs into the failed state.
///
/// Side effects of stages that already completed are left in place.
#[derive(Debug, Clone)]
pub struct FailureHandler {
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    error_message_limit: usize,
}

impl FailureHandler {
    /// Creates a new failure handler.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, sink: Arc<dyn EventSink>, error_message_limit: usize) -> Self {
        Self {
            store,
            sink,
            error_message_limit,
        }
    }

    /// Fails the run and mirrors the failure onto its owner in one checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is already terminal or the checkpoint fails.
    pub async fn handle(&self, run: &mut PipelineRun, failure: &RunFailure) -> Result<(), ContentflowError> {
        match failure {
            RunFailure::Validation(e) => error!(
                error_kind = failure.kind(),
                stage_id = %e.stage_id,
                missing = ?e.missing,
                "Stage inputs missing from context; the pipeline definition is miswired"
            ),
            RunFailure::Stage(f) => error!(
                error_kind = failure.kind(),
                stage_id = %f.stage_id,
                attempts = f.attempts,
                kind = %f.kind,
                error = %f.last_error,
                "Stage failed; failing run"
            ),
        }

        run.fail(truncate_message(&failure.message(), self.error_message_limit))?;
        self.store.checkpoint(run, &OwnerState::mirror(run)).await?;
        self.emit_failed(run, Some(failure.stage_id()), failure.kind()).await;
        Ok(())
    }

    /// Fails the stored snapshot of a run whose checkpoint was rejected.
    ///
    /// The persisted snapshot is the last consistent state, so it is the one
    /// failed and written back; on success `run` is replaced by it. If the
    /// store rejects this write too, the run is left as stored and the
    /// problem is logged.
    pub async fn abandon(&self, run: &mut PipelineRun, cause: &ContentflowError) {
        let mut stored = match self.store.load_run(run.id()).await {
            Ok(stored) => stored,
            Err(err) => {
                error!(run_id = %run.id(), cause = %cause, error = %err, "Cannot reload run to fail it");
                return;
            }
        };
        if stored.is_terminal() {
            *run = stored;
            return;
        }

        let message = match run.last_error() {
            Some(stage_error) if run.status() == RunStatus::Failed => stage_error.to_string(),
            _ => truncate_message(&format!("run could not be persisted: {cause}"), self.error_message_limit),
        };
        if let Err(err) = stored.fail(message) {
            error!(run_id = %run.id(), error = %err, "Cannot fail stored run");
            return;
        }
        match self.store.checkpoint(&stored, &OwnerState::mirror(&stored)).await {
            Ok(()) => {
                warn!(run_id = %run.id(), cause = %cause, "Run failed after a rejected checkpoint");
                *run = stored;
                self.emit_failed(run, None, "store").await;
            }
            Err(err) => {
                error!(run_id = %run.id(), cause = %cause, error = %err, "Run left unfinished; store rejected the failure");
            }
        }
    }

    async fn emit_failed(&self, run: &PipelineRun, stage_id: Option<&str>, kind: &str) {
        let mut payload = run_payload(run);
        if let Some(stage_id) = stage_id {
            payload["stage_id"] = stage_id.into();
        }
        payload["error_kind"] = kind.into();
        payload["error"] = run.last_error().unwrap_or_default().into();
        self.sink.emit(types::RUN_FAILED, Some(payload)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::events::CollectingEventSink;
    use crate::run::{InMemoryRunStore, OwnerRef};
    use uuid::Uuid;

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdefghij", 8), "abcde...");
        assert_eq!(truncate_message("ééééé", 4), "é...");
    }

    #[tokio::test]
    async fn test_handle_fails_run_and_owner_together() {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let handler = FailureHandler::new(store.clone(), sink.clone(), 40);

        let owner = OwnerRef::Document(Uuid::new_v4());
        let mut run = PipelineRun::new("ingestion", owner, RunContext::new());
        store.create_run(&run, &OwnerState::mirror(&run)).await.unwrap();
        run.begin().unwrap();

        let failure = RunFailure::Stage(StageFailure::retries_exhausted(
            "parse_document",
            3,
            "parse job did not finish within the poll budget",
        ));
        handler.handle(&mut run, &failure).await.unwrap();

        let stored = store.load_run(run.id()).await.unwrap();
        assert_eq!(stored.status(), RunStatus::Failed);
        assert!(stored.last_error().unwrap().chars().count() <= 40);
        assert!(stored.last_error().unwrap().starts_with("parse job did not"));
        let event = &sink.events_of_type(types::RUN_FAILED)[0].1;
        assert_eq!(event.as_ref().unwrap()["stage_id"], "parse_document");

        let owner_state = store.load_owner(owner).await.unwrap();
        assert!(owner_state.is_failed());
        assert_eq!(owner_state.error_message(), stored.last_error());
        assert_eq!(store.active_run(owner).await.unwrap(), None);
        assert_eq!(sink.count(types::RUN_FAILED), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_kind() {
        let failure = RunFailure::Validation(MissingInputError::new("vectorize", vec!["metadata".into()]));
        assert_eq!(failure.kind(), "validation");
        assert_eq!(failure.stage_id(), "vectorize");
    }
}
