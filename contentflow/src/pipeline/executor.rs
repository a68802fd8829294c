//! Stage executor: invokes one stage body under its retry policy.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use super::{RetryDecision, StageSpec};
use crate::context::StageInputs;
use crate::core::{AttemptOutcome, StageAttempt, StageOutput};
use crate::errors::StageFailure;
use crate::events::{types, EventSink};
use crate::observability::stage_span;
use crate::run::RunStore;

/// Runs stage bodies, classifies their errors and applies retry policies.
///
/// Every attempt is appended to the store's audit log. A failure to write
/// the audit log is logged and does not affect the stage.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
}

impl StageExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Executes `stage` against its projected inputs.
    ///
    /// The body is attempted at least once. Transient errors are retried
    /// until the policy's attempt budget is spent; fatal errors end the
    /// stage immediately.
    ///
    /// # Errors
    ///
    /// Returns `StageFailure` when the stage cannot produce an output.
    pub async fn execute(&self, stage: &StageSpec, inputs: &StageInputs) -> Result<StageOutput, StageFailure> {
        let span = stage_span(inputs.identity(), &stage.id);
        self.attempt_loop(stage, inputs).instrument(span).await
    }

    async fn attempt_loop(&self, stage: &StageSpec, inputs: &StageInputs) -> Result<StageOutput, StageFailure> {
        let run_id = inputs.run_id();
        self.sink
            .emit(
                types::STAGE_STARTED,
                Some(json!({"run_id": run_id.to_string(), "stage_id": stage.id})),
            )
            .await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started_at = Utc::now();
            let result = stage.runner.execute(inputs).await;

            let error = match result {
                Ok(output) => {
                    self.record(StageAttempt::new(run_id, &stage.id, attempt, AttemptOutcome::Success, started_at))
                        .await;
                    debug!(attempt, "Stage completed");
                    self.sink
                        .emit(
                            types::STAGE_COMPLETED,
                            Some(json!({"run_id": run_id.to_string(), "stage_id": stage.id, "attempts": attempt})),
                        )
                        .await;
                    return Ok(output);
                }
                Err(error) => error,
            };

            let outcome = if error.is_retryable() {
                AttemptOutcome::RetryableError
            } else {
                AttemptOutcome::FatalError
            };
            self.record(
                StageAttempt::new(run_id, &stage.id, attempt, outcome, started_at).with_error(error.message()),
            )
            .await;

            let failure = match stage.retry_policy.decide(attempt, &error) {
                RetryDecision::Retry(delay) => {
                    debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after error"
                    );
                    self.sink
                        .emit(
                            types::STAGE_RETRYING,
                            Some(json!({
                                "run_id": run_id.to_string(),
                                "stage_id": stage.id,
                                "attempt": attempt,
                                "error": error.message(),
                            })),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                RetryDecision::GiveUp => StageFailure::retries_exhausted(&stage.id, attempt, error.message()),
                RetryDecision::NotRetryable => StageFailure::fatal(&stage.id, attempt, error.message()),
            };

            warn!(attempts = attempt, kind = %failure.kind, error = %failure.last_error, "Stage failed");
            self.sink
                .emit(
                    types::STAGE_FAILED,
                    Some(json!({
                        "run_id": run_id.to_string(),
                        "stage_id": stage.id,
                        "attempts": attempt,
                        "kind": failure.kind,
                        "error": failure.last_error,
                    })),
                )
                .await;
            return Err(failure);
        }
    }

    async fn record(&self, attempt: StageAttempt) {
        if let Err(e) = self.store.append_attempt(attempt).await {
            warn!(error = %e, "Failed to append stage attempt to audit log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity};
    use crate::errors::{FailureKind, StageError};
    use crate::events::CollectingEventSink;
    use crate::pipeline::RetryPolicy;
    use crate::run::{InMemoryRunStore, OwnerRef};
    use crate::testing::ScriptedStage;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    struct Harness {
        store: Arc<InMemoryRunStore>,
        sink: Arc<CollectingEventSink>,
        executor: StageExecutor,
        inputs: StageInputs,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRunStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let executor = StageExecutor::new(store.clone(), sink.clone());
        let identity = RunIdentity::new(Uuid::now_v7(), "p", OwnerRef::Document(Uuid::new_v4()));
        let inputs = RunContext::new()
            .project(&identity, "s", &BTreeSet::new(), &BTreeSet::new())
            .unwrap();
        Harness { store, sink, executor, inputs }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let h = harness();
        let stage = StageSpec::new("s", Arc::new(ScriptedStage::always_ok(json!({"n": 1}))));

        let output = h.executor.execute(&stage, &h.inputs).await.unwrap();

        assert_eq!(output.as_value(), &json!({"n": 1}));
        let attempts = h.store.attempts(h.inputs.run_id()).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].is_success());
        assert_eq!(h.sink.count(types::STAGE_COMPLETED), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let h = harness();
        let body = Arc::new(ScriptedStage::fail_then_ok(
            vec![StageError::transient("429"), StageError::transient("503")],
            json!("done"),
        ));
        let stage = StageSpec::new("s", body.clone()).with_retry_policy(RetryPolicy::immediate(3));

        let output = h.executor.execute(&stage, &h.inputs).await.unwrap();

        assert_eq!(output.as_value(), &json!("done"));
        assert_eq!(body.call_count(), 3);
        let outcomes: Vec<_> = h
            .store
            .attempts(h.inputs.run_id())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![AttemptOutcome::RetryableError, AttemptOutcome::RetryableError, AttemptOutcome::Success]
        );
        assert_eq!(h.sink.count(types::STAGE_RETRYING), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let h = harness();
        let body = Arc::new(ScriptedStage::always_err(StageError::transient("timeout")));
        let stage = StageSpec::new("s", body.clone()).with_retry_policy(RetryPolicy::immediate(3));

        let failure = h.executor.execute(&stage, &h.inputs).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::RetriesExhausted);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_error, "timeout");
        assert_eq!(body.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let h = harness();
        let body = Arc::new(ScriptedStage::always_err(StageError::fatal("schema violation")));
        let stage = StageSpec::new("s", body.clone()).with_retry_policy(RetryPolicy::immediate(5));

        let failure = h.executor.execute(&stage, &h.inputs).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Fatal);
        assert_eq!(failure.attempts, 1);
        assert_eq!(body.call_count(), 1);
        let attempts = h.store.attempts(h.inputs.run_id()).await.unwrap();
        assert_eq!(attempts[0].outcome, AttemptOutcome::FatalError);
        assert_eq!(attempts[0].error_message.as_deref(), Some("schema violation"));
    }

    #[tokio::test]
    async fn test_backoff_sleeps_between_attempts() {
        let h = harness();
        let body = Arc::new(ScriptedStage::fail_then_ok(vec![StageError::transient("busy")], json!(1)));
        let policy = RetryPolicy::new()
            .with_base_delay_ms(20)
            .with_jitter(crate::pipeline::JitterStrategy::None);
        let stage = StageSpec::new("s", body).with_retry_policy(policy);

        let started = std::time::Instant::now();
        h.executor.execute(&stage, &h.inputs).await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    }
}
