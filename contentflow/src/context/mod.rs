//! Context management for pipeline runs.
//!
//! This module provides:
//! - The append-only run context that accumulates stage outputs
//! - Projected, typed stage inputs handed to each stage body
//! - The run identity carried through every stage invocation

mod identity;
mod inputs;
mod run_context;

pub use identity::RunIdentity;
pub use inputs::StageInputs;
pub use run_context::RunContext;
