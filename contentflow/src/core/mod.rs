//! Core domain model types for contentflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Run status and attempt outcome enums
//! - Stage output values
//! - The stage attempt audit record

mod attempt;
mod output;
mod status;

pub use attempt::StageAttempt;
pub use output::StageOutput;
pub use status::{AttemptOutcome, RunStatus};
