//! Owner entities whose user-visible status mirrors a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::PipelineRun;
use crate::core::RunStatus;

/// Reference to the entity a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OwnerRef {
    /// An uploaded document.
    Document(Uuid),
    /// A course generation request.
    CourseGenerationRequest(Uuid),
}

impl OwnerRef {
    /// Returns the entity id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::Document(id) | Self::CourseGenerationRequest(id) => *id,
        }
    }

    /// Returns a short kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::CourseGenerationRequest(_) => "course_generation_request",
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Processing status shown on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Uploaded, ingestion not started.
    #[default]
    Pending,
    /// Ingestion in progress.
    Processing,
    /// Ingestion finished.
    Completed,
    /// Ingestion failed.
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status shown on a course generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseRequestStatus {
    /// Requested, generation not started.
    #[default]
    Pending,
    /// Generation in progress.
    Processing,
    /// Generation finished.
    Completed,
    /// Generation failed.
    Failed,
}

/// Externally visible document fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    /// The document id.
    pub id: Uuid,
    /// The processing status.
    pub processing_status: ProcessingStatus,
    /// Truncated failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Externally visible course generation request fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRequestState {
    /// The request id.
    pub id: Uuid,
    /// The request status.
    pub status: CourseRequestStatus,
    /// Progress in percent.
    pub generation_progress: u8,
    /// Index of the stage currently being generated.
    pub current_step: usize,
    /// Whether generation is in flight.
    pub is_generating: bool,
    /// Truncated failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The user-visible state of an owner entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnerState {
    /// A document.
    Document(DocumentState),
    /// A course generation request.
    CourseGenerationRequest(CourseRequestState),
}

impl OwnerState {
    /// The state of an owner that has never been driven by a run.
    #[must_use]
    pub const fn initial(owner: OwnerRef) -> Self {
        match owner {
            OwnerRef::Document(id) => Self::Document(DocumentState {
                id,
                processing_status: ProcessingStatus::Pending,
                error_message: None,
            }),
            OwnerRef::CourseGenerationRequest(id) => Self::CourseGenerationRequest(CourseRequestState {
                id,
                status: CourseRequestStatus::Pending,
                generation_progress: 0,
                current_step: 0,
                is_generating: false,
                error_message: None,
            }),
        }
    }

    /// Derives the owner's visible fields from its run.
    #[must_use]
    pub fn mirror(run: &PipelineRun) -> Self {
        let error_message = run.last_error().map(str::to_string);
        match run.owner() {
            OwnerRef::Document(id) => Self::Document(DocumentState {
                id,
                processing_status: match run.status() {
                    RunStatus::Pending => ProcessingStatus::Pending,
                    RunStatus::Running => ProcessingStatus::Processing,
                    RunStatus::Succeeded => ProcessingStatus::Completed,
                    RunStatus::Failed => ProcessingStatus::Failed,
                },
                error_message,
            }),
            OwnerRef::CourseGenerationRequest(id) => Self::CourseGenerationRequest(CourseRequestState {
                id,
                status: match run.status() {
                    RunStatus::Pending => CourseRequestStatus::Pending,
                    RunStatus::Running => CourseRequestStatus::Processing,
                    RunStatus::Succeeded => CourseRequestStatus::Completed,
                    RunStatus::Failed => CourseRequestStatus::Failed,
                },
                generation_progress: run.progress_percent(),
                current_step: run.current_stage_index(),
                is_generating: !run.status().is_terminal(),
                error_message,
            }),
        }
    }

    /// Returns the reference for this owner.
    #[must_use]
    pub const fn owner_ref(&self) -> OwnerRef {
        match self {
            Self::Document(doc) => OwnerRef::Document(doc.id),
            Self::CourseGenerationRequest(req) => OwnerRef::CourseGenerationRequest(req.id),
        }
    }

    /// Returns true if the owner shows a failed marker.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        match self {
            Self::Document(doc) => doc.processing_status == ProcessingStatus::Failed,
            Self::CourseGenerationRequest(req) => req.status == CourseRequestStatus::Failed,
        }
    }

    /// Returns the failure message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Document(doc) => doc.error_message.as_deref(),
            Self::CourseGenerationRequest(req) => req.error_message.as_deref(),
        }
    }
}
