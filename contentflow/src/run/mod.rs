//! Pipeline run records, owner entities and their persistence.
//!
//! This module provides:
//! - The `PipelineRun` state machine record
//! - Owner entity references and their user-visible state
//! - Fan-out sub-run records
//! - The `RunStore` persistence port with in-memory and SQLite stores

mod owner;
mod record;
mod sqlite_store;
mod store;
mod sub_run;

pub use owner::{
    CourseRequestState, CourseRequestStatus, DocumentState, OwnerRef, OwnerState, ProcessingStatus,
};
pub use record::PipelineRun;
pub use sqlite_store::SqliteRunStore;
pub use store::{InMemoryRunStore, RunStore};
pub use sub_run::SubRunRecord;
