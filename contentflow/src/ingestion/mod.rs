//! Document ingestion.
//!
//! A validated upload is classified, copied into the owner's blob area,
//! parsed to markdown when it is a PDF, described by extracted metadata,
//! and finally chunked into the vector index.

mod chunking;
mod model;
mod pipeline;
mod ports;
mod stages;

#[cfg(test)]
mod scenario_tests;

pub use chunking::{ChunkMetadata, ChunkSource, DocumentChunk, TextChunker};
pub use model::{
    BoundingBox, DocumentMetadata, DocumentType, DocumentValidation, ExtractedMetadata, LayoutElement,
    LayoutElementType, ParsedDocument, StoredBlob, UploadCompleted, VectorizationSummary,
};
pub use pipeline::{ingestion_pipeline, IngestionPorts, INGESTION_PIPELINE_ID};
pub use ports::{
    BlobStore, ContentCatalog, ContentRecord, DocumentParser, FetchedBlob, MetadataExtractor, ParseJobStatus,
    VectorIndex,
};
pub use stages::{
    document_path, is_pdf, markdown_path, ExtractMetadata, ParseDocument, StoreDocument, StoreMarkdown,
    ValidateDocument, Vectorize, METADATA_PROMPT_CHARS,
};

/// Context keys of the ingestion pipeline.
pub mod keys {
    /// Trigger: the [`UploadCompleted`](super::UploadCompleted) event.
    pub const DOCUMENT: &str = "document";
    /// Output of `validate_document`.
    pub const VALIDATION: &str = "validation";
    /// Output of `store_document`.
    pub const STORED_DOCUMENT: &str = "stored_document";
    /// Output of `parse_document`.
    pub const PARSED: &str = "parsed";
    /// Output of `store_markdown`.
    pub const STORED_MARKDOWN: &str = "stored_markdown";
    /// Output of `extract_metadata`.
    pub const METADATA: &str = "metadata";
    /// Output of `vectorize`.
    pub const VECTORS: &str = "vectors";
}
