//! The document ingestion definition.

use std::sync::Arc;

use super::chunking::TextChunker;
use super::keys;
use super::ports::{BlobStore, ContentCatalog, DocumentParser, MetadataExtractor, VectorIndex};
use super::stages::{is_pdf, ExtractMetadata, ParseDocument, StoreDocument, StoreMarkdown, ValidateDocument, Vectorize};
use crate::config::IngestionConfig;
use crate::errors::PipelineValidationError;
use crate::pipeline::{PipelineDefinition, RetryPolicy, StageSpec};
use crate::stages::typed;

/// Pipeline id of document ingestion runs.
pub const INGESTION_PIPELINE_ID: &str = "document_ingestion";

/// Collaborators the ingestion stages call.
#[derive(Debug, Clone)]
pub struct IngestionPorts {
    /// Blob storage.
    pub blobs: Arc<dyn BlobStore>,
    /// PDF parse service.
    pub parser: Arc<dyn DocumentParser>,
    /// Metadata extraction.
    pub extractor: Arc<dyn MetadataExtractor>,
    /// Content catalog.
    pub catalog: Arc<dyn ContentCatalog>,
    /// Vector index.
    pub index: Arc<dyn VectorIndex>,
}

/// Builds the ingestion definition.
///
/// Stages: `validate_document`, `store_document`, `parse_document` and
/// `store_markdown` (PDF only), `extract_metadata`, `vectorize`.
///
/// # Errors
///
/// Returns a validation error if the definition is malformed.
pub fn ingestion_pipeline(
    ports: &IngestionPorts,
    config: &IngestionConfig,
    retry: &RetryPolicy,
) -> Result<PipelineDefinition, PipelineValidationError> {
    PipelineDefinition::builder(INGESTION_PIPELINE_ID)
        .trigger_key(keys::DOCUMENT)
        .stage(
            StageSpec::new("validate_document", typed(ValidateDocument::new(ports.blobs.clone())))
                .with_inputs([keys::DOCUMENT])
                .with_output_key(keys::VALIDATION)
                .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new("store_document", typed(StoreDocument::new(ports.blobs.clone())))
                .with_inputs([keys::DOCUMENT, keys::VALIDATION])
                .with_output_key(keys::STORED_DOCUMENT)
                .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new(
                "parse_document",
                typed(ParseDocument::new(
                    ports.blobs.clone(),
                    ports.parser.clone(),
                    config.parse_poll_interval(),
                    config.parse_max_polls,
                )),
            )
            .with_inputs([keys::DOCUMENT, keys::STORED_DOCUMENT])
            .with_output_key(keys::PARSED)
            .with_retry_policy(retry.clone())
            .with_weight(3)
            .when(is_pdf),
        )
        .stage(
            StageSpec::new("store_markdown", typed(StoreMarkdown::new(ports.blobs.clone())))
                .with_inputs([keys::DOCUMENT, keys::PARSED])
                .with_output_key(keys::STORED_MARKDOWN)
                .with_retry_policy(retry.clone())
                .when(is_pdf),
        )
        .stage(
            StageSpec::new(
                "extract_metadata",
                typed(ExtractMetadata::new(
                    ports.blobs.clone(),
                    ports.extractor.clone(),
                    ports.catalog.clone(),
                )),
            )
            .with_inputs([keys::DOCUMENT, keys::STORED_DOCUMENT])
            .with_optional_inputs([keys::PARSED])
            .with_output_key(keys::METADATA)
            .with_retry_policy(retry.clone()),
        )
        .stage(
            StageSpec::new(
                "vectorize",
                typed(Vectorize::new(
                    ports.blobs.clone(),
                    ports.index.clone(),
                    TextChunker::new(config.chunk_size, config.chunk_overlap),
                    config.upsert_batch_size,
                )),
            )
            .with_inputs([keys::DOCUMENT, keys::STORED_DOCUMENT, keys::METADATA])
            .with_optional_inputs([keys::PARSED])
            .with_output_key(keys::VECTORS)
            .with_retry_policy(retry.clone())
            .with_weight(2),
        )
        .build()
}
