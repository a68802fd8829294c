//! Stage specifications.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::RetryPolicy;
use crate::context::RunContext;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;

/// Predicate deciding whether a conditional stage runs.
pub type StageCondition = Arc<dyn Fn(&RunContext) -> bool + Send + Sync>;

/// Specification for a single stage in a pipeline.
#[derive(Clone)]
pub struct StageSpec {
    /// The unique id of the stage.
    pub id: String,
    /// Context keys that must be present before the stage runs.
    pub input_keys: BTreeSet<String>,
    /// Context keys passed through when present.
    pub optional_input_keys: BTreeSet<String>,
    /// Context key the stage's output is stored under.
    pub output_key: String,
    /// Retry policy for transient failures.
    pub retry_policy: RetryPolicy,
    /// Progress weight, credited once when the stage completes or is skipped.
    pub weight: u32,
    /// The stage body.
    pub runner: Arc<dyn Stage>,
    condition: Option<StageCondition>,
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("input_keys", &self.input_keys)
            .field("optional_input_keys", &self.optional_input_keys)
            .field("output_key", &self.output_key)
            .field("retry_policy", &self.retry_policy)
            .field("weight", &self.weight)
            .field("conditional", &self.condition.is_some())
            .finish_non_exhaustive()
    }
}

impl StageSpec {
    /// Creates a new stage specification whose output key is its id.
    #[must_use]
    pub fn new(id: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        let id = id.into();
        Self {
            output_key: id.clone(),
            id,
            input_keys: BTreeSet::new(),
            optional_input_keys: BTreeSet::new(),
            retry_policy: RetryPolicy::default(),
            weight: 1,
            runner,
            condition: None,
        }
    }

    /// Sets the required input keys.
    #[must_use]
    pub fn with_inputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the optional input keys.
    #[must_use]
    pub fn with_optional_inputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.optional_input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the output key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the progress weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Makes the stage conditional on the run context.
    #[must_use]
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&RunContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Returns true if the stage has a condition.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Evaluates the stage condition against the context.
    #[must_use]
    pub fn should_run(&self, context: &RunContext) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(context))
    }

    /// Returns every key the stage may read.
    pub fn declared_inputs(&self) -> impl Iterator<Item = &String> {
        self.input_keys.iter().chain(self.optional_input_keys.iter())
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, the weight is zero, or the stage
    /// reads its own output key.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let reason = if self.id.trim().is_empty() {
            Some("stage id cannot be empty".to_string())
        } else if self.weight == 0 {
            Some(format!("stage '{}' has zero progress weight", self.id))
        } else if self.declared_inputs().any(|key| *key == self.output_key) {
            Some(format!("stage '{}' reads its own output key '{}'", self.id, self.output_key))
        } else {
            None
        };

        match reason {
            None => Ok(()),
            Some(reason) => Err(PipelineValidationError::new(reason.clone())
                .with_stages(vec![self.id.clone()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-005-INVALID_STAGE", reason)
                        .with_fix_hint("Give the stage a non-empty id, a positive weight and an output key it does not consume."),
                )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use crate::stages::NoOpStage;

    fn noop() -> Arc<dyn Stage> {
        Arc::new(NoOpStage)
    }

    #[test]
    fn test_stage_spec_defaults() {
        let spec = StageSpec::new("store_document", noop());
        assert_eq!(spec.output_key, "store_document");
        assert_eq!(spec.weight, 1);
        assert_eq!(spec.retry_policy, RetryPolicy::default());
        assert!(!spec.is_conditional());
    }

    #[test]
    fn test_stage_spec_builder() {
        let spec = StageSpec::new("vectorize", noop())
            .with_inputs(["metadata", "stored_document"])
            .with_optional_inputs(["parsed_text"])
            .with_output_key("vectorization")
            .with_weight(3);

        assert_eq!(spec.input_keys.len(), 2);
        assert_eq!(spec.declared_inputs().count(), 3);
        assert_eq!(spec.output_key, "vectorization");
        assert_eq!(spec.weight, 3);
    }

    #[test]
    fn test_zero_weight_rejected() {
        let err = StageSpec::new("s", noop()).with_weight(0).validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-005-INVALID_STAGE"));
    }

    #[test]
    fn test_self_input_rejected() {
        let spec = StageSpec::new("s", noop()).with_inputs(["s"]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_condition_evaluated_against_context() {
        let spec = StageSpec::new("parse", noop()).when(|ctx| ctx.contains_key("pdf"));
        let mut ctx = RunContext::new();
        assert!(!spec.should_run(&ctx));

        ctx.insert("pdf", StageOutput::empty()).unwrap();
        assert!(spec.should_run(&ctx));
    }
}
