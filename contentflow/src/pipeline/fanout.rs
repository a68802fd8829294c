//! Fan-out: one stage that runs an inner pipeline once per unit.
//!
//! Units run sequentially, in the order the plan lists them. Each unit gets
//! a sub-run identity derived from the parent run and is persisted as its
//! own [`SubRunRecord`] as soon as it finishes.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::{PipelineDefinition, StageExecutor};
use crate::context::{RunContext, RunIdentity, StageInputs};
use crate::core::{RunStatus, StageOutput};
use crate::errors::{StageError, StoreError};
use crate::events::{types, EventSink};
use crate::observability::fanout_unit_span;
use crate::run::{RunStore, SubRunRecord};
use crate::stages::Stage;

/// What happens to the remaining units when one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Stop at the first failed unit and fail the fan-out stage.
    #[default]
    AbortOnFirstFailure,
    /// Run every unit and report the failures in the aggregate.
    CollectAndContinue,
}

impl fmt::Display for FanOutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortOnFirstFailure => write!(f, "abort_on_first_failure"),
            Self::CollectAndContinue => write!(f, "collect_and_continue"),
        }
    }
}

/// One unit of fan-out work.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutUnit {
    /// Stable key of the unit.
    pub key: String,
    /// Context the unit's inner run starts with.
    pub seed: RunContext,
}

impl FanOutUnit {
    /// Creates a new unit.
    #[must_use]
    pub fn new(key: impl Into<String>, seed: RunContext) -> Self {
        Self { key: key.into(), seed }
    }
}

/// The recorded outcome of every unit that ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// One record per unit that ran, in unit order.
    pub records: Vec<SubRunRecord>,
    /// Number of units the plan produced.
    pub planned: usize,
}

impl FanOutReport {
    /// Records of units that succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &SubRunRecord> {
        self.records.iter().filter(|r| r.succeeded())
    }

    /// Records of units that failed.
    pub fn failed(&self) -> impl Iterator<Item = &SubRunRecord> {
        self.records.iter().filter(|r| !r.succeeded())
    }

    /// Returns true if every planned unit ran and succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.records.len() == self.planned && self.records.iter().all(SubRunRecord::succeeded)
    }

    /// Summary suitable as a stage output.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "planned": self.planned,
            "succeeded": self.succeeded().count(),
            "failed": self.failed().map(|r| r.unit_key.clone()).collect::<Vec<_>>(),
        })
    }
}

/// Errors that stop a fan-out.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// A unit failed under [`FanOutPolicy::AbortOnFirstFailure`].
    #[error("Fan-out unit {unit_index} ('{unit_key}') of stage '{stage_id}' failed: {message}")]
    UnitFailed {
        /// The fan-out stage.
        stage_id: String,
        /// Position of the failed unit.
        unit_index: usize,
        /// Key of the failed unit.
        unit_key: String,
        /// The unit's failure message.
        message: String,
    },

    /// A unit record could not be persisted.
    #[error("Failed to record fan-out unit: {0}")]
    Store(#[from] StoreError),
}

impl From<FanOutError> for StageError {
    fn from(err: FanOutError) -> Self {
        // retrying the outer stage would replay units that already wrote
        Self::fatal(err.to_string())
    }
}

/// Runs an inner definition once per unit.
#[derive(Debug, Clone)]
pub struct FanOutDriver {
    definition: Arc<PipelineDefinition>,
    executor: StageExecutor,
    store: Arc<dyn RunStore>,
    sink: Arc<dyn EventSink>,
    policy: FanOutPolicy,
}

impl FanOutDriver {
    /// Creates a new driver.
    #[must_use]
    pub fn new(definition: Arc<PipelineDefinition>, store: Arc<dyn RunStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            executor: StageExecutor::new(store.clone(), sink.clone()),
            definition,
            store,
            sink,
            policy: FanOutPolicy::default(),
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the failure policy.
    #[must_use]
    pub const fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Returns the inner definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Runs every unit under `parent`.
    ///
    /// # Errors
    ///
    /// Returns `UnitFailed` on the first failed unit when aborting, or
    /// `Store` if a unit record cannot be written.
    pub async fn run(
        &self,
        parent: &RunIdentity,
        stage_id: &str,
        units: Vec<FanOutUnit>,
    ) -> Result<FanOutReport, FanOutError> {
        let mut report = FanOutReport {
            records: Vec::with_capacity(units.len()),
            planned: units.len(),
        };

        for (unit_index, unit) in units.into_iter().enumerate() {
            let span = fanout_unit_span(parent, stage_id, unit_index, &unit.key);
            let record = self
                .run_unit(parent, stage_id, unit_index, unit)
                .instrument(span)
                .await;

            self.store.record_sub_run(record.clone()).await?;
            let payload = json!({
                "parent_run_id": parent.run_id.to_string(),
                "sub_run_id": record.id.to_string(),
                "stage_id": stage_id,
                "unit_index": unit_index,
                "unit_key": record.unit_key,
                "error": record.last_error,
            });

            if record.succeeded() {
                self.sink.emit(types::FANOUT_UNIT_COMPLETED, Some(payload)).await;
                report.records.push(record);
                continue;
            }

            warn!(
                unit_index,
                unit_key = %record.unit_key,
                error = ?record.last_error,
                policy = %self.policy,
                "Fan-out unit failed"
            );
            self.sink.emit(types::FANOUT_UNIT_FAILED, Some(payload)).await;
            if self.policy == FanOutPolicy::AbortOnFirstFailure {
                return Err(FanOutError::UnitFailed {
                    stage_id: stage_id.to_string(),
                    unit_index,
                    unit_key: record.unit_key,
                    message: record.last_error.unwrap_or_default(),
                });
            }
            report.records.push(record);
        }

        Ok(report)
    }

    async fn run_unit(&self, parent: &RunIdentity, stage_id: &str, unit_index: usize, unit: FanOutUnit) -> SubRunRecord {
        let identity = parent.child(Uuid::now_v7(), self.definition.id());
        let started_at = Utc::now();
        let mut context = unit.seed;
        let mut stages_completed = 0;

        let outcome = self.run_inner(&identity, &mut context, &mut stages_completed).await;
        debug!(stages_completed, ok = outcome.is_ok(), "Fan-out unit finished");

        let (status, last_error) = match outcome {
            Ok(()) => (RunStatus::Succeeded, None),
            Err(message) => (RunStatus::Failed, Some(message)),
        };
        SubRunRecord {
            id: identity.run_id,
            parent_run_id: parent.run_id,
            stage_id: stage_id.to_string(),
            unit_index,
            unit_key: unit.key,
            status,
            stages_completed,
            context,
            last_error,
            started_at,
            completed_at: Utc::now(),
        }
    }

    async fn run_inner(
        &self,
        identity: &RunIdentity,
        context: &mut RunContext,
        stages_completed: &mut usize,
    ) -> Result<(), String> {
        if let Some(missing) = self.definition.trigger_keys().iter().find(|k| !context.contains_key(k)) {
            return Err(format!("unit seed is missing trigger key '{missing}'"));
        }

        for stage in self.definition.stages() {
            if !stage.should_run(context) {
                *stages_completed += 1;
                continue;
            }
            let inputs = context
                .project(identity, &stage.id, &stage.input_keys, &stage.optional_input_keys)
                .map_err(|e| e.to_string())?;
            let output = self
                .executor
                .execute(stage, &inputs)
                .await
                .map_err(|failure| failure.to_string())?;
            context.insert(&stage.output_key, output).map_err(|e| e.to_string())?;
            *stages_completed += 1;
        }
        Ok(())
    }
}

/// Plans the units of a fan-out stage and folds their results.
#[async_trait]
pub trait FanOutPlan: Send + Sync + fmt::Debug {
    /// Lists the units to run, in order.
    ///
    /// # Errors
    ///
    /// Returns a stage error if the inputs cannot be planned.
    async fn units(&self, inputs: &StageInputs) -> Result<Vec<FanOutUnit>, StageError>;

    /// Builds the stage output from the report.
    ///
    /// # Errors
    ///
    /// Returns a stage error if the results cannot be aggregated.
    async fn aggregate(&self, _inputs: &StageInputs, report: FanOutReport) -> Result<StageOutput, StageError> {
        Ok(StageOutput::new(report.summary()))
    }
}

/// A [`Stage`] that runs a [`FanOutPlan`] through a [`FanOutDriver`].
#[derive(Debug)]
pub struct FanOutStage<P> {
    plan: P,
    driver: FanOutDriver,
}

impl<P: FanOutPlan> FanOutStage<P> {
    /// Creates a new fan-out stage.
    #[must_use]
    pub const fn new(plan: P, driver: FanOutDriver) -> Self {
        Self { plan, driver }
    }
}

#[async_trait]
impl<P: FanOutPlan> Stage for FanOutStage<P> {
    async fn execute(&self, inputs: &StageInputs) -> Result<StageOutput, StageError> {
        let units = self.plan.units(inputs).await?;
        let report = self
            .driver
            .run(inputs.identity(), inputs.stage_id(), units)
            .await?;
        self.plan.aggregate(inputs, report).await
    }
}
