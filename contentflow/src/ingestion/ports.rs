//! External collaborators the ingestion stages call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use super::chunking::DocumentChunk;
use super::model::{DocumentMetadata, StoredBlob};
use crate::errors::PortError;

/// Bytes fetched from blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlob {
    /// Raw content.
    pub bytes: Vec<u8>,
    /// Content type the store reported, if any.
    pub content_type: Option<String>,
}

/// Blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Downloads the blob at `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedBlob, PortError>;

    /// Uploads `bytes` under `pathname`.
    async fn store(&self, pathname: &str, bytes: Vec<u8>, content_type: &str) -> Result<StoredBlob, PortError>;
}

/// Status of an asynchronous parse job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseJobStatus {
    /// Still running.
    Pending,
    /// Finished with markdown text.
    Success {
        /// The parsed markdown.
        text: String,
    },
    /// Failed permanently.
    Error {
        /// Parser-reported reason.
        message: String,
    },
}

/// Document-to-markdown parsing service.
#[async_trait]
pub trait DocumentParser: Send + Sync + Debug {
    /// Submits a parse job and returns its id.
    async fn submit_parse_job(&self, bytes: Vec<u8>, filename: &str) -> Result<String, PortError>;

    /// Reads the current job status.
    async fn poll_job(&self, job_id: &str) -> Result<ParseJobStatus, PortError>;
}

/// LLM-backed structured metadata extraction.
#[async_trait]
pub trait MetadataExtractor: Send + Sync + Debug {
    /// Extracts an object conforming to `schema` from `text`.
    async fn extract(&self, text: &str, schema: &serde_json::Value) -> Result<serde_json::Value, PortError>;
}

/// What the catalog stores for an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Source document.
    pub document_id: Uuid,
    /// Uploading user.
    pub owner_id: String,
    /// Metadata title, or the filename when the document has none.
    pub title: String,
    /// Original filename.
    pub original_filename: String,
    /// Extracted metadata.
    pub metadata: DocumentMetadata,
}

/// Persistent catalog of ingested content.
#[async_trait]
pub trait ContentCatalog: Send + Sync + Debug {
    /// Records content and returns its id.
    async fn record_content(&self, record: ContentRecord) -> Result<String, PortError>;
}

/// Vector index holding document chunks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync + Debug {
    /// Upserts a batch of chunks and returns how many were accepted.
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<usize, PortError>;
}
