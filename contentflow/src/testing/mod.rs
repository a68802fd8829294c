//! Testing utilities for contentflow pipelines.
//!
//! This module provides:
//! - Scripted and recording stages for engine tests
//! - In-memory fakes of every external collaborator
//! - Fixtures for triggers and course outlines

mod fakes;
pub mod fixtures;
mod mocks;

pub use fakes::{
    CourseFakes, FakeBlobStore, FakeContentCatalog, FakeContentGenerator, FakeCourseRepository, FakeDocumentParser,
    FakeMetadataExtractor, FakeVectorIndex, FakeVideoSearch, IngestionFakes,
};
pub use mocks::{RecordingStage, ScriptedStage};
