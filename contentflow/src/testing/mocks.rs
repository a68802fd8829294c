//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::StageInputs;
use crate::core::StageOutput;
use crate::errors::StageError;
use crate::stages::Stage;

/// A stage that replays a scripted sequence of errors, then a fixed result.
#[derive(Debug)]
pub struct ScriptedStage {
    script: Mutex<VecDeque<StageError>>,
    fallback: Result<serde_json::Value, StageError>,
    calls: AtomicUsize,
}

impl ScriptedStage {
    /// Creates a stage that always succeeds with `value`.
    #[must_use]
    pub fn always_ok(value: serde_json::Value) -> Self {
        Self::fail_then_ok(Vec::new(), value)
    }

    /// Creates a stage that fails with each of `errors` in turn, then succeeds.
    #[must_use]
    pub fn fail_then_ok(errors: Vec<StageError>, value: serde_json::Value) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            fallback: Ok(value),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a stage that always fails with `error`.
    #[must_use]
    pub fn always_err(error: StageError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of times the stage was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    async fn execute(&self, _inputs: &StageInputs) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().pop_front() {
            return Err(error);
        }
        self.fallback.clone().map(StageOutput::new)
    }
}

/// A stage that records the inputs it was given.
#[derive(Debug)]
pub struct RecordingStage {
    output: serde_json::Value,
    seen: Mutex<Vec<BTreeMap<String, serde_json::Value>>>,
}

impl RecordingStage {
    /// Creates a new recording stage returning `output`.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the projected inputs of every invocation.
    #[must_use]
    pub fn seen(&self) -> Vec<BTreeMap<String, serde_json::Value>> {
        self.seen.lock().clone()
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        self.seen.lock().push(inputs.values().clone());
        Ok(StageOutput::new(self.output.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunIdentity};
    use crate::run::OwnerRef;
    use serde_json::json;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn inputs() -> StageInputs {
        let identity = RunIdentity::new(Uuid::now_v7(), "p", OwnerRef::Document(Uuid::new_v4()));
        RunContext::new()
            .project(&identity, "s", &BTreeSet::new(), &BTreeSet::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_scripted_stage_replays_errors() {
        let stage = ScriptedStage::fail_then_ok(vec![StageError::transient("a")], json!(1));
        assert!(stage.execute(&inputs()).await.is_err());
        assert_eq!(stage.execute(&inputs()).await.unwrap().as_value(), &json!(1));
        assert_eq!(stage.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recording_stage() {
        let stage = RecordingStage::new(json!("out"));
        stage.execute(&inputs()).await.unwrap();
        assert_eq!(stage.execution_count(), 1);
        assert!(stage.seen()[0].is_empty());
    }
}
