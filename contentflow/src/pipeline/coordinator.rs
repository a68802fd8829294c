//! Run coordinator: drives a run through its definition one stage at a time.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use super::{FailureHandler, PipelineDefinition, RunFailure, StageExecutor};
use crate::context::RunContext;
use crate::core::RunStatus;
use crate::errors::{ContentflowError, TransitionError};
use crate::events::{run_payload, types, EventSink};
use crate::observability::run_span;
use crate::run::{OwnerRef, OwnerState, PipelineRun, RunStore};

/// What a single `advance` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A stage ran and its output was merged.
    StageCompleted {
        /// The stage that completed.
        stage_id: String,
        /// Progress after the stage.
        progress: u8,
    },
    /// A conditional stage did not run.
    StageSkipped {
        /// The stage that was skipped.
        stage_id: String,
        /// Progress after the skip.
        progress: u8,
    },
    /// The final stage completed and the run succeeded.
    Succeeded,
    /// The run failed during this call.
    Failed,
    /// The run was already terminal; nothing changed.
    Terminal(RunStatus),
}

impl AdvanceOutcome {
    /// Returns true if the run reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Terminal(_))
    }
}

/// Owns the state machine of runs for one pipeline definition.
///
/// Each `advance` persists exactly one checkpoint after the stage it ran,
/// covering the run's index, progress, context and the owner's mirrored
/// fields together.
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    definition: Arc<PipelineDefinition>,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    executor: StageExecutor,
    failures: FailureHandler,
}

impl RunCoordinator {
    /// Creates a new coordinator.
    #[must_use]
    pub fn new(
        definition: Arc<PipelineDefinition>,
        store: Arc<dyn RunStore>,
        sink: Arc<dyn EventSink>,
        error_message_limit: usize,
    ) -> Self {
        Self {
            executor: StageExecutor::new(store.clone(), sink.clone()),
            failures: FailureHandler::new(store.clone(), sink.clone(), error_message_limit),
            definition,
            store,
            sink,
        }
    }

    /// Returns the definition this coordinator drives.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Creates a pending run seeded with the trigger payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTrigger` if a trigger key is missing, or a store
    /// error if the owner is already claimed by another run.
    pub async fn create_run(&self, owner: OwnerRef, trigger: RunContext) -> Result<PipelineRun, ContentflowError> {
        let missing: Vec<&str> = self
            .definition
            .trigger_keys()
            .iter()
            .filter(|key| !trigger.contains_key(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ContentflowError::InvalidTrigger(format!(
                "pipeline '{}' requires trigger keys {missing:?}",
                self.definition.id()
            )));
        }

        let run = PipelineRun::new(self.definition.id(), owner, trigger);
        self.store.create_run(&run, &OwnerState::mirror(&run)).await?;
        info!(run_id = %run.id(), pipeline_id = %run.pipeline_id(), owner = %owner, "Run created");
        self.sink.emit(types::RUN_CREATED, Some(run_payload(&run))).await;
        Ok(run)
    }

    /// Runs the current stage and persists the result.
    ///
    /// A pending run is started first. Terminal runs are returned untouched.
    /// If a checkpoint is rejected the run is failed in the store before the
    /// error is returned, releasing its owner.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store rejects a checkpoint; stage
    /// failures are recorded on the run and reported as
    /// [`AdvanceOutcome::Failed`].
    pub async fn advance(&self, run: &mut PipelineRun) -> Result<AdvanceOutcome, ContentflowError> {
        if run.is_terminal() {
            return Ok(AdvanceOutcome::Terminal(run.status()));
        }
        match self.step(run).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.failures.abandon(run, &err).await;
                Err(err)
            }
        }
    }

    async fn step(&self, run: &mut PipelineRun) -> Result<AdvanceOutcome, ContentflowError> {
        if run.status() == RunStatus::Pending {
            run.begin()?;
            self.store.checkpoint(run, &OwnerState::mirror(run)).await?;
            info!(run_id = %run.id(), "Run started");
            self.sink.emit(types::RUN_STARTED, Some(run_payload(run))).await;
        }

        let index = run.current_stage_index();
        let stage_count = self.definition.len();
        let Some(stage) = self.definition.stage(index) else {
            return Err(TransitionError::new(run.id(), run.status(), "advance", "no stage left to run").into());
        };
        let progress = self
            .definition
            .progress()
            .next_percent(run.progress_percent(), index + 1);

        if !stage.should_run(run.context()) {
            debug!(run_id = %run.id(), stage_id = %stage.id, "Condition not met, skipping stage");
            run.record_stage_skipped(index, progress)?;
            self.sink
                .emit(
                    types::STAGE_SKIPPED,
                    Some(json!({"run_id": run.id().to_string(), "stage_id": stage.id})),
                )
                .await;
            if run.current_stage_index() == stage_count {
                run.succeed(stage_count)?;
            }
            return self
                .checkpoint_step(run, AdvanceOutcome::StageSkipped { stage_id: stage.id.clone(), progress })
                .await;
        }

        let inputs = match run.context().project(
            &run.identity(),
            &stage.id,
            &stage.input_keys,
            &stage.optional_input_keys,
        ) {
            Ok(inputs) => inputs,
            Err(missing) => {
                self.failures.handle(run, &RunFailure::Validation(missing)).await?;
                return Ok(AdvanceOutcome::Failed);
            }
        };

        let output = match self.executor.execute(stage, &inputs).await {
            Ok(output) => output,
            Err(failure) => {
                self.failures.handle(run, &RunFailure::Stage(failure)).await?;
                return Ok(AdvanceOutcome::Failed);
            }
        };

        run.record_stage_success(index, &stage.output_key, output, progress)?;
        if run.current_stage_index() == stage_count {
            run.succeed(stage_count)?;
        }
        self.checkpoint_step(run, AdvanceOutcome::StageCompleted { stage_id: stage.id.clone(), progress })
            .await
    }

    /// Advances the run until it is terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint fails.
    pub async fn run_to_completion(&self, run: PipelineRun) -> Result<PipelineRun, ContentflowError> {
        let span = run_span(&run);
        self.drive(run).instrument(span).await
    }

    async fn drive(&self, mut run: PipelineRun) -> Result<PipelineRun, ContentflowError> {
        loop {
            if self.advance(&mut run).await?.is_terminal() {
                return Ok(run);
            }
        }
    }

    async fn checkpoint_step(&self, run: &PipelineRun, step: AdvanceOutcome) -> Result<AdvanceOutcome, ContentflowError> {
        self.store.checkpoint(run, &OwnerState::mirror(run)).await?;
        self.sink.emit(types::RUN_PROGRESS, Some(run_payload(run))).await;

        if run.status() == RunStatus::Succeeded {
            info!(run_id = %run.id(), "Run succeeded");
            self.sink.emit(types::RUN_SUCCEEDED, Some(run_payload(run))).await;
            return Ok(AdvanceOutcome::Succeeded);
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StageAttempt, StageOutput};
    use crate::errors::StoreError;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{RetryPolicy, StageSpec};
    use crate::run::{InMemoryRunStore, SubRunRecord};
    use crate::stages::{FnStage, Stage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Rejects the first `n` checkpoints, then delegates.
    #[derive(Debug)]
    struct RejectingStore {
        inner: InMemoryRunStore,
        rejections_left: AtomicUsize,
    }

    impl RejectingStore {
        fn new(n: usize) -> Self {
            Self {
                inner: InMemoryRunStore::new(),
                rejections_left: AtomicUsize::new(n),
            }
        }
    }

    #[async_trait]
    impl RunStore for RejectingStore {
        async fn create_run(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
            self.inner.create_run(run, owner).await
        }

        async fn checkpoint(&self, run: &PipelineRun, owner: &OwnerState) -> Result<(), StoreError> {
            let reject = self
                .rejections_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if reject {
                return Err(StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some("database is locked".into()),
                )));
            }
            self.inner.checkpoint(run, owner).await
        }

        async fn load_run(&self, run_id: Uuid) -> Result<PipelineRun, StoreError> {
            self.inner.load_run(run_id).await
        }

        async fn load_owner(&self, owner: OwnerRef) -> Result<OwnerState, StoreError> {
            self.inner.load_owner(owner).await
        }

        async fn active_run(&self, owner: OwnerRef) -> Result<Option<Uuid>, StoreError> {
            self.inner.active_run(owner).await
        }

        async fn append_attempt(&self, attempt: StageAttempt) -> Result<(), StoreError> {
            self.inner.append_attempt(attempt).await
        }

        async fn attempts(&self, run_id: Uuid) -> Result<Vec<StageAttempt>, StoreError> {
            self.inner.attempts(run_id).await
        }

        async fn record_sub_run(&self, record: SubRunRecord) -> Result<(), StoreError> {
            self.inner.record_sub_run(record).await
        }

        async fn sub_runs(&self, parent_run_id: Uuid) -> Result<Vec<SubRunRecord>, StoreError> {
            self.inner.sub_runs(parent_run_id).await
        }
    }

    fn echo(id: &'static str) -> Arc<dyn Stage> {
        Arc::new(FnStage::new(id, move |_| Ok(StageOutput::new(json!(id)))))
    }

    fn coordinator(stages: Vec<StageSpec>) -> (RunCoordinator, Arc<InMemoryRunStore>, Arc<CollectingEventSink>) {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let mut builder = PipelineDefinition::builder("p").trigger_key("input");
        for stage in stages {
            builder = builder.stage(stage);
        }
        let definition = builder.build().unwrap();
        let coordinator = RunCoordinator::new(Arc::new(definition), store.clone(), sink.clone(), 500);
        (coordinator, store, sink)
    }

    fn trigger() -> RunContext {
        let mut ctx = RunContext::new();
        ctx.insert("input", StageOutput::new(json!("seed"))).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_create_run_requires_trigger_keys() {
        let (coordinator, store, _) = coordinator(vec![StageSpec::new("a", echo("a"))]);
        let err = coordinator
            .create_run(OwnerRef::Document(Uuid::new_v4()), RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentflowError::InvalidTrigger(_)));
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_one_stage_per_call() {
        let (coordinator, store, sink) = coordinator(vec![
            StageSpec::new("a", echo("a")).with_inputs(["input"]),
            StageSpec::new("b", echo("b")).with_inputs(["a"]),
        ]);
        let mut run = coordinator
            .create_run(OwnerRef::Document(Uuid::new_v4()), trigger())
            .await
            .unwrap();

        let first = coordinator.advance(&mut run).await.unwrap();
        assert_eq!(first, AdvanceOutcome::StageCompleted { stage_id: "a".into(), progress: 50 });
        let stored = store.load_run(run.id()).await.unwrap();
        assert_eq!(stored.current_stage_index(), 1);
        assert_eq!(stored.progress_percent(), 50);
        assert_eq!(stored.status(), RunStatus::Running);

        assert_eq!(coordinator.advance(&mut run).await.unwrap(), AdvanceOutcome::Succeeded);
        assert_eq!(run.progress_percent(), 100);
        assert_eq!(
            coordinator.advance(&mut run).await.unwrap(),
            AdvanceOutcome::Terminal(RunStatus::Succeeded)
        );
        assert_eq!(sink.count(types::RUN_STARTED), 1);
        assert_eq!(sink.count(types::RUN_SUCCEEDED), 1);
    }

    #[tokio::test]
    async fn test_skipped_stage_credits_progress_without_attempt() {
        let (coordinator, store, sink) = coordinator(vec![
            StageSpec::new("a", echo("a")),
            StageSpec::new("b", echo("b")).when(|ctx| ctx.contains_key("never")),
            StageSpec::new("c", echo("c")),
        ]);
        let run = coordinator
            .create_run(OwnerRef::Document(Uuid::new_v4()), trigger())
            .await
            .unwrap();

        let run = coordinator.run_to_completion(run).await.unwrap();

        assert_eq!(run.status(), RunStatus::Succeeded);
        assert!(!run.context().contains_key("b"));
        let attempted: Vec<String> = store
            .attempts(run.id())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.stage_id)
            .collect();
        assert_eq!(attempted, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(sink.count(types::STAGE_SKIPPED), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_fails_run_and_owner() {
        let failing: Arc<dyn Stage> = Arc::new(FnStage::new("b", |_| {
            Err(crate::errors::StageError::transient("upstream 503"))
        }));
        let (coordinator, store, _) = coordinator(vec![
            StageSpec::new("a", echo("a")),
            StageSpec::new("b", failing).with_retry_policy(RetryPolicy::immediate(2)),
        ]);
        let owner = OwnerRef::Document(Uuid::new_v4());
        let run = coordinator.create_run(owner, trigger()).await.unwrap();

        let run = coordinator.run_to_completion(run).await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.current_stage_index(), 1);
        assert!(run.last_error().unwrap().contains("upstream 503"));
        assert!(store.load_owner(owner).await.unwrap().is_failed());
        assert_eq!(store.attempts(run.id()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_checkpoint_fails_run_and_releases_owner() {
        let store = Arc::new(RejectingStore::new(1));
        let sink = Arc::new(CollectingEventSink::new());
        let definition = PipelineDefinition::builder("p")
            .trigger_key("input")
            .stage(StageSpec::new("a", echo("a")))
            .build()
            .unwrap();
        let coordinator = RunCoordinator::new(Arc::new(definition), store.clone(), sink.clone(), 500);
        let owner = OwnerRef::Document(Uuid::new_v4());
        let mut run = coordinator.create_run(owner, trigger()).await.unwrap();

        let err = coordinator.advance(&mut run).await.unwrap_err();

        assert!(matches!(err, ContentflowError::Store(StoreError::Database(_))));
        assert_eq!(run.status(), RunStatus::Failed);
        let stored = store.inner.load_run(run.id()).await.unwrap();
        assert_eq!(stored.status(), RunStatus::Failed);
        assert!(stored.last_error().unwrap().contains("could not be persisted"));
        assert!(store.inner.load_owner(owner).await.unwrap().is_failed());
        assert_eq!(store.inner.active_run(owner).await.unwrap(), None);
        assert_eq!(sink.count(types::RUN_FAILED), 1);
        tokio_test::assert_ok!(coordinator.create_run(owner, trigger()).await);
    }
}
