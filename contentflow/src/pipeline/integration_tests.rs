//! End-to-end tests for the engine: coordinator, executor, failure handler and fan-out together.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::context::{RunContext, StageInputs};
    use crate::core::{RunStatus, StageOutput};
    use crate::errors::{ContentflowError, StageError, StoreError};
    use crate::events::{types, CollectingEventSink};
    use crate::pipeline::{
        AdvanceOutcome, FanOutDriver, FanOutPlan, FanOutStage, FanOutUnit, PipelineDefinition, RetryPolicy,
        RunCoordinator, StageSpec,
    };
    use crate::run::{InMemoryRunStore, OwnerRef, RunStore};
    use crate::stages::{FnStage, Stage};
    use crate::testing::{RecordingStage, ScriptedStage};

    fn constant(value: serde_json::Value) -> Arc<dyn Stage> {
        Arc::new(ScriptedStage::always_ok(value))
    }

    struct Harness {
        coordinator: RunCoordinator,
        store: Arc<InMemoryRunStore>,
        sink: Arc<CollectingEventSink>,
    }

    fn harness(definition: PipelineDefinition) -> Harness {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let coordinator = RunCoordinator::new(Arc::new(definition), store.clone(), sink.clone(), 500);
        Harness { coordinator, store, sink }
    }

    fn owner() -> OwnerRef {
        OwnerRef::Document(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_index_advances_by_one_per_stage() {
        let definition = PipelineDefinition::define(
            "four",
            vec![
                StageSpec::new("a", constant(json!(1))),
                StageSpec::new("b", constant(json!(2))).with_inputs(["a"]),
                StageSpec::new("c", constant(json!(3))).with_inputs(["b"]),
                StageSpec::new("d", constant(json!(4))).with_inputs(["a", "c"]),
            ],
        )
        .unwrap();
        let h = harness(definition);
        let mut run = h.coordinator.create_run(owner(), RunContext::new()).await.unwrap();

        let mut indexes = Vec::new();
        let mut progress = Vec::new();
        loop {
            let outcome = h.coordinator.advance(&mut run).await.unwrap();
            let stored = h.store.load_run(run.id()).await.unwrap();
            indexes.push(stored.current_stage_index());
            progress.push(stored.progress_percent());
            if outcome.is_terminal() {
                break;
            }
        }

        assert_eq!(indexes, vec![1, 2, 3, 4]);
        assert_eq!(progress, vec![25, 50, 75, 100]);
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.context().len(), 4);
    }

    #[tokio::test]
    async fn test_non_uniform_weights_drive_progress() {
        let definition = PipelineDefinition::define(
            "weighted",
            vec![
                StageSpec::new("a", constant(json!(null))),
                StageSpec::new("b", constant(json!(null))),
                StageSpec::new("c", constant(json!(null))).with_weight(6),
                StageSpec::new("d", constant(json!(null))),
            ],
        )
        .unwrap();
        let h = harness(definition);
        let mut run = h.coordinator.create_run(owner(), RunContext::new()).await.unwrap();

        let mut seen = Vec::new();
        while !h.coordinator.advance(&mut run).await.unwrap().is_terminal() {
            seen.push(run.progress_percent());
        }
        seen.push(run.progress_percent());

        assert_eq!(seen, vec![11, 22, 88, 100]);
        let progress_events = h.sink.events_of_type(types::RUN_PROGRESS);
        assert_eq!(progress_events.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_completed_outputs() {
        let definition = PipelineDefinition::define(
            "partial",
            vec![
                StageSpec::new("a", constant(json!("first"))),
                StageSpec::new("b", constant(json!("second"))),
                StageSpec::new("c", Arc::new(ScriptedStage::always_err(StageError::fatal("bad schema")))),
                StageSpec::new("d", constant(json!("never"))),
            ],
        )
        .unwrap();
        let h = harness(definition);
        let run = h.coordinator.create_run(owner(), RunContext::new()).await.unwrap();

        let run = h.coordinator.run_to_completion(run).await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.current_stage_index(), 2);
        assert_eq!(run.progress_percent(), 50);
        let keys: Vec<&str> = run.context().keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(h.store.load_run(run.id()).await.unwrap(), run);
    }

    #[tokio::test]
    async fn test_terminal_run_cannot_be_changed() {
        let definition = PipelineDefinition::define(
            "fails",
            vec![StageSpec::new("a", Arc::new(ScriptedStage::always_err(StageError::fatal("no"))))],
        )
        .unwrap();
        let h = harness(definition);
        let run = h.coordinator.create_run(owner(), RunContext::new()).await.unwrap();
        let mut run = h.coordinator.run_to_completion(run).await.unwrap();
        let frozen = run.clone();

        let outcome = h.coordinator.advance(&mut run).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Terminal(RunStatus::Failed));
        assert_eq!(run, frozen);

        let err = h
            .store
            .checkpoint(&run, &crate::run::OwnerState::mirror(&run))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalRun(_)));
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_any_attempt() {
        let consumer = Arc::new(RecordingStage::new(json!("consumed")));
        let definition = PipelineDefinition::define(
            "skips",
            vec![
                StageSpec::new("a", constant(json!(1))),
                StageSpec::new("b", constant(json!(2))).when(|_| false),
                StageSpec::new("c", consumer.clone()).with_inputs(["b"]),
            ],
        )
        .unwrap();
        let h = harness(definition);
        let run = h.coordinator.create_run(owner(), RunContext::new()).await.unwrap();

        let run = h.coordinator.run_to_completion(run).await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.last_error().unwrap().contains("missing required inputs: b"));
        assert_eq!(consumer.execution_count(), 0);
        let attempted: Vec<String> = h
            .store
            .attempts(run.id())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.stage_id)
            .collect();
        assert_eq!(attempted, vec!["a".to_string()]);
        let failed = h.sink.events_of_type(types::RUN_FAILED);
        assert_eq!(failed[0].1.as_ref().unwrap()["error_kind"], "validation");
    }

    #[tokio::test]
    async fn test_stage_sees_only_declared_inputs() {
        let reader = Arc::new(RecordingStage::new(json!(null)));
        let definition = PipelineDefinition::builder("projection")
            .trigger_key("document")
            .stage(StageSpec::new("a", constant(json!("a-out"))))
            .stage(StageSpec::new("b", constant(json!("b-out"))))
            .stage(StageSpec::new("c", reader.clone()).with_inputs(["document", "b"]))
            .build()
            .unwrap();
        let h = harness(definition);
        let mut trigger = RunContext::new();
        trigger.insert("document", StageOutput::new(json!({"id": 1}))).unwrap();
        let run = h.coordinator.create_run(owner(), trigger).await.unwrap();

        h.coordinator.run_to_completion(run).await.unwrap();

        let seen = reader.seen();
        let keys: Vec<&String> = seen[0].keys().collect();
        assert_eq!(keys, vec!["b", "document"]);
    }

    #[tokio::test]
    async fn test_second_run_for_busy_owner_rejected() {
        let definition = PipelineDefinition::define("p", vec![StageSpec::new("a", constant(json!(1)))]).unwrap();
        let h = harness(definition);
        let owner = owner();
        let first = h.coordinator.create_run(owner, RunContext::new()).await.unwrap();

        let err = h.coordinator.create_run(owner, RunContext::new()).await.unwrap_err();
        assert!(matches!(err, ContentflowError::Store(StoreError::OwnerBusy { .. })));

        h.coordinator.run_to_completion(first).await.unwrap();
        assert!(h.coordinator.create_run(owner, RunContext::new()).await.is_ok());
    }

    #[derive(Debug)]
    struct CountPlan;

    #[async_trait]
    impl FanOutPlan for CountPlan {
        async fn units(&self, inputs: &StageInputs) -> Result<Vec<FanOutUnit>, StageError> {
            let count: u64 = inputs.require("plan")?;
            (0..count)
                .map(|n| -> Result<FanOutUnit, StageError> {
                    let mut seed = RunContext::new();
                    seed.insert("n", StageOutput::new(json!(n)))
                        .map_err(|e| StageError::fatal(e.to_string()))?;
                    Ok(FanOutUnit::new(format!("u{n}"), seed))
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_fanout_abort_fails_outer_stage_once() {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let unit_body: Arc<dyn Stage> = Arc::new(FnStage::new("unit", |inputs: &StageInputs| {
            let n: u64 = inputs.require("n")?;
            if n == 2 {
                Err(StageError::transient("rate limited"))
            } else {
                Ok(StageOutput::new(json!(n)))
            }
        }));
        let inner = PipelineDefinition::builder("unit")
            .trigger_key("n")
            .stage(
                StageSpec::new("work", unit_body)
                    .with_inputs(["n"])
                    .with_retry_policy(RetryPolicy::immediate(2)),
            )
            .build()
            .unwrap();
        let driver = FanOutDriver::new(Arc::new(inner), store.clone(), sink.clone());
        let outer = PipelineDefinition::define(
            "outer",
            vec![
                StageSpec::new("plan", constant(json!(4))),
                StageSpec::new("fan", Arc::new(FanOutStage::new(CountPlan, driver)))
                    .with_inputs(["plan"])
                    .with_retry_policy(RetryPolicy::immediate(3)),
            ],
        )
        .unwrap();
        let coordinator = RunCoordinator::new(Arc::new(outer), store.clone(), sink.clone(), 500);
        let run = coordinator.create_run(owner(), RunContext::new()).await.unwrap();

        let run = coordinator.run_to_completion(run).await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        let outer_attempts: Vec<_> = store
            .attempts(run.id())
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.stage_id == "fan")
            .collect();
        assert_eq!(outer_attempts.len(), 1);

        let records = store.sub_runs(run.id()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].succeeded() && records[1].succeeded());
        assert_eq!(records[2].unit_key, "u2");
        assert_eq!(store.attempts(records[2].id).await.unwrap().len(), 2);
    }
}
