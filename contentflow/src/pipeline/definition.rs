//! Pipeline definitions and their validating builder.

use std::collections::BTreeSet;

use super::{ProgressReporter, StageSpec};
use crate::errors::{ContractErrorInfo, PipelineValidationError};

/// An ordered, validated list of stages.
///
/// Immutable once built; runs share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    id: String,
    trigger_keys: BTreeSet<String>,
    stages: Vec<StageSpec>,
    progress: ProgressReporter,
}

impl PipelineDefinition {
    /// Builds a definition without trigger keys.
    ///
    /// # Errors
    ///
    /// Returns `PipelineValidationError` under the same rules as
    /// [`PipelineBuilder::build`].
    pub fn define(id: impl Into<String>, stages: Vec<StageSpec>) -> Result<Self, PipelineValidationError> {
        stages
            .into_iter()
            .fold(PipelineBuilder::new(id), PipelineBuilder::stage)
            .build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(id)
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the keys a trigger must seed.
    #[must_use]
    pub const fn trigger_keys(&self) -> &BTreeSet<String> {
        &self.trigger_keys
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the stage at `index`.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&StageSpec> {
        self.stages.get(index)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built definition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage ids in order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    /// Returns the progress reporter for this definition's weights.
    #[must_use]
    pub const fn progress(&self) -> &ProgressReporter {
        &self.progress
    }
}

/// Builder for creating validated pipeline definitions.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    id: String,
    trigger_keys: BTreeSet<String>,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger_keys: BTreeSet::new(),
            stages: Vec::new(),
        }
    }

    /// Declares a key the trigger seeds into the context.
    #[must_use]
    pub fn trigger_key(mut self, key: impl Into<String>) -> Self {
        self.trigger_keys.insert(key.into());
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline has no stages, two stages share an
    /// id or an output key, a stage is invalid on its own, or a stage reads
    /// a key that neither the trigger nor an earlier stage produces.
    pub fn build(self) -> Result<PipelineDefinition, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!("Pipeline '{}' has no stages", self.id))
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-001-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                ));
        }

        let mut ids = BTreeSet::new();
        let mut available = self.trigger_keys.clone();

        for spec in &self.stages {
            spec.validate()?;

            if !ids.insert(spec.id.clone()) {
                return Err(PipelineValidationError::new(format!("Duplicate stage id '{}'", spec.id))
                    .with_stages(vec![spec.id.clone()])
                    .with_error_info(
                        ContractErrorInfo::new("CONTRACT-002-DUPLICATE_STAGE", format!("Stage '{}' is defined twice", spec.id))
                            .with_fix_hint("Give every stage a unique id."),
                    ));
            }

            if let Some(missing) = spec.declared_inputs().find(|key| !available.contains(*key)) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' reads '{}' which no trigger key or earlier stage produces",
                    spec.id, missing
                ))
                .with_stages(vec![spec.id.clone()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-UNPRODUCED_INPUT", format!("Input '{missing}' is not produced before '{}'", spec.id))
                        .with_context_entry("pipeline", &self.id)
                        .with_fix_hint("Move the producing stage earlier or declare the key as a trigger key."),
                ));
            }

            if !available.insert(spec.output_key.clone()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' writes output key '{}' which is already produced",
                    spec.id, spec.output_key
                ))
                .with_stages(vec![spec.id.clone()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-003-DUPLICATE_OUTPUT", format!("Output key '{}' is written twice", spec.output_key))
                        .with_fix_hint("Context keys are append-only; choose a distinct output key."),
                ));
            }
        }

        let progress = ProgressReporter::from_weights(self.stages.iter().map(|s| s.weight));
        Ok(PipelineDefinition {
            id: self.id,
            trigger_keys: self.trigger_keys,
            stages: self.stages,
            progress,
        })
    }
}
