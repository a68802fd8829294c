//! # Contentflow
//!
//! A staged-pipeline orchestrator for content processing.
//!
//! One generic engine drives every pipeline:
//!
//! - **Pipeline definitions**: ordered, validated stage lists with declared
//!   inputs, output keys, retry policies and progress weights
//! - **Run coordination**: a persisted run state machine advanced one stage
//!   at a time, mirrored onto the user-visible owner entity
//! - **Fan-out**: a stage that runs an inner pipeline once per unit
//! - **Event-driven observability**: lifecycle events and `tracing` spans
//!
//! Two pipelines are built on it: document ingestion (`ingestion`) and
//! course generation with per-lesson fan-out (`course`). The
//! [`service::PipelineService`] turns trigger events into running pipelines.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentflow::prelude::*;
//!
//! let service = PipelineService::new(&ingestion_ports, course_ports, store, sink, config)?;
//! let handle = service.on_upload_completed(upload).await?;
//! let run = handle.wait().await?;
//! assert_eq!(run.status(), RunStatus::Succeeded);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod course;
pub mod errors;
pub mod events;
pub mod ingestion;
pub mod observability;
pub mod pipeline;
pub mod run;
pub mod service;
pub mod stages;
pub mod testing;

pub use errors::ContentflowError;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CourseConfig, IngestionConfig, OrchestratorConfig};
    pub use crate::context::{RunContext, RunIdentity, StageInputs};
    pub use crate::core::{AttemptOutcome, RunStatus, StageAttempt, StageOutput};
    pub use crate::course::{course_pipeline, CoursePorts, GenerationRequested};
    pub use crate::errors::{
        ContentflowError, DataConflictError, MissingInputError, PipelineValidationError, PortError, StageError,
        StageFailure, StoreError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::ingestion::{ingestion_pipeline, IngestionPorts, UploadCompleted};
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::pipeline::{
        FanOutDriver, FanOutPlan, FanOutPolicy, FanOutStage, PipelineDefinition, RetryPolicy, RunCoordinator,
        StageSpec,
    };
    pub use crate::run::{InMemoryRunStore, OwnerRef, OwnerState, PipelineRun, RunStore, SqliteRunStore};
    pub use crate::service::{PipelineService, RunHandle};
    pub use crate::stages::{typed, Stage, TypedStage};
}
