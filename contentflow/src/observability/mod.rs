//! Observability utilities.
//!
//! This module provides:
//! - `tracing` subscriber initialisation from [`LoggingConfig`]
//! - Span constructors shared by the coordinator, executor and fan-out driver

mod logging;
mod spans;

pub use logging::{init_logging, LoggingConfig, LogFormat, LOG_ENV_VAR};
pub use spans::{fanout_unit_span, run_span, stage_span};
