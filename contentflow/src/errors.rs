//! Error types for the contentflow orchestrator.
//!
//! Errors fall into three families:
//! - definition errors, raised while a pipeline is being built
//! - run-time contract errors, raised when a stage's declared inputs are missing
//! - stage errors, raised by stage bodies and classified as transient or fatal

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::core::RunStatus;

/// The main error type for contentflow operations.
#[derive(Debug, Error)]
pub enum ContentflowError {
    /// A pipeline definition failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage's declared inputs were missing from the run context.
    #[error("{0}")]
    MissingInput(#[from] MissingInputError),

    /// A stage exhausted its retries or failed fatally.
    #[error("{0}")]
    StageFailed(#[from] StageFailure),

    /// A context key was written twice.
    #[error("{0}")]
    DataConflict(#[from] DataConflictError),

    /// The run store rejected an operation.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A run state transition was not allowed.
    #[error("{0}")]
    InvalidTransition(#[from] TransitionError),

    /// A trigger event was rejected before a run was created.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A spawned run task panicked or was aborted.
    #[error("Run task failed: {0}")]
    Join(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ContentflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-UNPRODUCED_INPUT").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Raised when a stage is about to run but its required inputs are absent.
///
/// This indicates a wiring bug in the definition, never a transient
/// condition, so it is not counted against the stage's retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage_id}' is missing required inputs: {}", missing.join(", "))]
pub struct MissingInputError {
    /// The stage whose inputs were checked.
    pub stage_id: String,
    /// Declared input keys absent from the context.
    pub missing: Vec<String>,
}

impl MissingInputError {
    /// Creates a new missing input error.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            missing,
        }
    }
}

/// Error raised when writing to an existing key in the run context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Data conflict: key '{key}' already exists")]
pub struct DataConflictError {
    /// The conflicting key.
    pub key: String,
}

impl DataConflictError {
    /// Creates a new data conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Error raised when a stage reads a key it did not declare.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Undeclared input: stage '{stage}' attempted to read '{key}' which was not declared as an input")]
pub struct UndeclaredInputError {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredInputError {
    /// Creates a new undeclared input error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// An error returned by a stage body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// Network, rate-limit or timeout style failure. Retried per policy.
    #[error("transient: {0}")]
    Transient(String),

    /// Schema violation or failed precondition. Never retried.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the error may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns the bare error message without the classification prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Fatal(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Fatal(format!("output contract violated: {err}"))
    }
}

impl From<UndeclaredInputError> for StageError {
    fn from(err: UndeclaredInputError) -> Self {
        Self::Fatal(err.to_string())
    }
}

/// Error returned by an external collaborator (blob store, LLM, vector index, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The collaborator was unreachable or throttled.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// The collaborator name.
        service: String,
        /// Error details.
        message: String,
    },

    /// The collaborator rejected the request.
    #[error("{service} rejected request: {message}")]
    Rejected {
        /// The collaborator name.
        service: String,
        /// Error details.
        message: String,
    },
}

impl PortError {
    /// Creates an unavailable error.
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a rejected error.
    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<PortError> for StageError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Unavailable { .. } => Self::Transient(err.to_string()),
            PortError::Rejected { .. } => Self::Fatal(err.to_string()),
        }
    }
}

/// Why a stage gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every allowed attempt ended in a transient error.
    RetriesExhausted,
    /// An attempt ended in a fatal error.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Terminal failure of a single stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage '{stage_id}' failed after {attempts} attempt(s) ({kind}): {last_error}")]
pub struct StageFailure {
    /// The failing stage.
    pub stage_id: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// The message of the last error.
    pub last_error: String,
    /// Why the executor gave up.
    pub kind: FailureKind,
}

impl StageFailure {
    /// Creates a failure for a stage that ran out of attempts.
    #[must_use]
    pub fn retries_exhausted(stage_id: impl Into<String>, attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            attempts,
            last_error: last_error.into(),
            kind: FailureKind::RetriesExhausted,
        }
    }

    /// Creates a failure for a stage that hit a fatal error.
    #[must_use]
    pub fn fatal(stage_id: impl Into<String>, attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            attempts,
            last_error: last_error.into(),
            kind: FailureKind::Fatal,
        }
    }
}

/// Error raised when a run is asked to make a transition it cannot make.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Run {run_id} cannot {action} while {status}: {reason}")]
pub struct TransitionError {
    /// The run.
    pub run_id: Uuid,
    /// The run's status at the time.
    pub status: RunStatus,
    /// The attempted transition.
    pub action: String,
    /// Why it was refused.
    pub reason: String,
}

impl TransitionError {
    /// Creates a new transition error.
    #[must_use]
    pub fn new(run_id: Uuid, status: RunStatus, action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            status,
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a [`crate::run::RunStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested run does not exist.
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// The requested owner entity does not exist.
    #[error("Owner not found: {0}")]
    OwnerNotFound(String),

    /// The owner entity already has an active run.
    #[error("Owner {owner} is already driven by run {active_run}")]
    OwnerBusy {
        /// The owner entity.
        owner: String,
        /// The run currently holding the owner.
        active_run: Uuid,
    },

    /// The stored run is terminal and may not be overwritten.
    #[error("Run {0} is terminal and cannot be checkpointed again")]
    TerminalRun(Uuid),

    /// A run with the same id already exists.
    #[error("Run already exists: {0}")]
    DuplicateRun(Uuid),

    /// Serialization failure.
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// The database rejected a statement or transaction.
    #[error("Store database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
