//! Ingestion stage bodies.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::chunking::{ChunkSource, TextChunker};
use super::keys;
use super::model::{
    DocumentMetadata, DocumentType, DocumentValidation, ExtractedMetadata, ParsedDocument, StoredBlob, UploadCompleted,
    VectorizationSummary,
};
use super::ports::{BlobStore, ContentCatalog, ContentRecord, DocumentParser, MetadataExtractor, ParseJobStatus, VectorIndex};
use crate::context::{RunContext, StageInputs};
use crate::errors::StageError;
use crate::stages::TypedStage;

/// Characters of document text handed to the metadata extractor.
pub const METADATA_PROMPT_CHARS: usize = 8000;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const MARKDOWN_CONTENT_TYPE: &str = "text/markdown";

/// Classifies the upload by content type and extension.
#[derive(Debug)]
pub struct ValidateDocument {
    blobs: Arc<dyn BlobStore>,
}

impl ValidateDocument {
    /// Creates a new validate stage.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl TypedStage for ValidateDocument {
    type Output = DocumentValidation;

    async fn run(&self, inputs: &StageInputs) -> Result<DocumentValidation, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let fetched = self.blobs.fetch(&upload.blob_url).await?;
        let file_extension = upload.extension();
        let document_type = DocumentType::detect(fetched.content_type.as_deref(), file_extension.as_deref());

        info!(
            document_id = %upload.document_id,
            document_type = %document_type,
            content_type = fetched.content_type.as_deref().unwrap_or("unknown"),
            "Document validated"
        );
        Ok(DocumentValidation {
            document_type,
            content_type: fetched.content_type,
            file_extension,
        })
    }
}

/// Copies the upload into the owner's document area.
#[derive(Debug)]
pub struct StoreDocument {
    blobs: Arc<dyn BlobStore>,
}

impl StoreDocument {
    /// Creates a new store stage.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

/// Path of the stored original document.
#[must_use]
pub fn document_path(upload: &UploadCompleted, document_type: DocumentType) -> String {
    let extension = upload
        .extension()
        .unwrap_or_else(|| document_type.default_extension().to_string());
    format!("{}/documents/{}.{extension}", upload.owner_id, upload.document_id)
}

/// Path of the parsed markdown.
#[must_use]
pub fn markdown_path(upload: &UploadCompleted) -> String {
    format!("{}/markdown/{}.md", upload.owner_id, upload.document_id)
}

#[async_trait]
impl TypedStage for StoreDocument {
    type Output = StoredBlob;

    async fn run(&self, inputs: &StageInputs) -> Result<StoredBlob, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let validation: DocumentValidation = inputs.require(keys::VALIDATION)?;

        let fetched = self.blobs.fetch(&upload.blob_url).await?;
        let content_type = fetched
            .content_type
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        let path = document_path(&upload, validation.document_type);
        let stored = self.blobs.store(&path, fetched.bytes, &content_type).await?;

        info!(document_id = %upload.document_id, pathname = %stored.pathname, size = stored.size, "Document stored");
        Ok(stored)
    }
}

/// Converts a stored PDF to markdown through the parse service.
#[derive(Debug)]
pub struct ParseDocument {
    blobs: Arc<dyn BlobStore>,
    parser: Arc<dyn DocumentParser>,
    poll_interval: Duration,
    max_polls: u32,
}

impl ParseDocument {
    /// Creates a new parse stage polling every `poll_interval`, at most `max_polls` times.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        parser: Arc<dyn DocumentParser>,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            blobs,
            parser,
            poll_interval,
            max_polls,
        }
    }
}

#[async_trait]
impl TypedStage for ParseDocument {
    type Output = ParsedDocument;

    async fn run(&self, inputs: &StageInputs) -> Result<ParsedDocument, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let stored: StoredBlob = inputs.require(keys::STORED_DOCUMENT)?;

        let fetched = self.blobs.fetch(&stored.url).await?;
        let job_id = self.parser.submit_parse_job(fetched.bytes, &upload.filename).await?;
        debug!(document_id = %upload.document_id, job_id = %job_id, "Parse job submitted");

        for poll in 1..=self.max_polls {
            match self.parser.poll_job(&job_id).await? {
                ParseJobStatus::Success { text } => {
                    info!(document_id = %upload.document_id, job_id = %job_id, polls = poll, "Document parsed");
                    return Ok(ParsedDocument {
                        job_id,
                        markdown: text,
                        polls: poll,
                    });
                }
                ParseJobStatus::Error { message } => {
                    return Err(StageError::fatal(format!("parse job {job_id} failed: {message}")));
                }
                ParseJobStatus::Pending => {
                    if poll < self.max_polls {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }

        warn!(document_id = %upload.document_id, job_id = %job_id, polls = self.max_polls, "Parse job still pending");
        Err(StageError::transient(format!(
            "parse job {job_id} did not finish after {} polls",
            self.max_polls
        )))
    }
}

/// Stores the parsed markdown next to the original document.
#[derive(Debug)]
pub struct StoreMarkdown {
    blobs: Arc<dyn BlobStore>,
}

impl StoreMarkdown {
    /// Creates a new markdown store stage.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl TypedStage for StoreMarkdown {
    type Output = StoredBlob;

    async fn run(&self, inputs: &StageInputs) -> Result<StoredBlob, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let parsed: ParsedDocument = inputs.require(keys::PARSED)?;
        let stored = self
            .blobs
            .store(&markdown_path(&upload), parsed.markdown.into_bytes(), MARKDOWN_CONTENT_TYPE)
            .await?;
        info!(document_id = %upload.document_id, pathname = %stored.pathname, "Markdown stored");
        Ok(stored)
    }
}

/// Reads the document text: parsed markdown when present, else the stored blob.
async fn document_text(blobs: &dyn BlobStore, inputs: &StageInputs) -> Result<String, StageError> {
    if let Some(parsed) = inputs.optional::<ParsedDocument>(keys::PARSED)? {
        return Ok(parsed.markdown);
    }
    let stored: StoredBlob = inputs.require(keys::STORED_DOCUMENT)?;
    let fetched = blobs.fetch(&stored.url).await?;
    Ok(String::from_utf8_lossy(&fetched.bytes).into_owned())
}

/// Extracts metadata and layout, then records the content in the catalog.
#[derive(Debug)]
pub struct ExtractMetadata {
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn MetadataExtractor>,
    catalog: Arc<dyn ContentCatalog>,
}

impl ExtractMetadata {
    /// Creates a new metadata stage.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn MetadataExtractor>,
        catalog: Arc<dyn ContentCatalog>,
    ) -> Self {
        Self {
            blobs,
            extractor,
            catalog,
        }
    }

    fn prompt(filename: &str, text: &str) -> String {
        let excerpt: String = text.chars().take(METADATA_PROMPT_CHARS).collect();
        format!(
            "Extract document metadata and layout elements from \"{filename}\".\n\
             Report the title, author, subject, keywords, creation and modification dates, \
             page count and language. List headers, paragraphs, tables, lists, images and \
             footers with estimated bounding boxes.\n\n{excerpt}"
        )
    }
}

#[async_trait]
impl TypedStage for ExtractMetadata {
    type Output = ExtractedMetadata;

    async fn run(&self, inputs: &StageInputs) -> Result<ExtractedMetadata, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let text = document_text(self.blobs.as_ref(), inputs).await?;

        let raw = self
            .extractor
            .extract(&Self::prompt(&upload.filename, &text), &DocumentMetadata::schema())
            .await?;
        let metadata: DocumentMetadata = serde_json::from_value(raw)
            .map_err(|e| StageError::fatal(format!("extracted metadata does not match schema: {e}")))?;

        let record = ContentRecord {
            document_id: upload.document_id,
            owner_id: upload.owner_id.clone(),
            title: metadata.title.clone().unwrap_or_else(|| upload.filename.clone()),
            original_filename: upload.filename.clone(),
            metadata: metadata.clone(),
        };
        let content_id = self.catalog.record_content(record).await?;

        info!(
            document_id = %upload.document_id,
            content_id = %content_id,
            layout_elements = metadata.layout_elements.len(),
            "Metadata extracted"
        );
        Ok(ExtractedMetadata { content_id, metadata })
    }
}

/// Chunks the text and upserts the chunks in batches.
#[derive(Debug)]
pub struct Vectorize {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
    chunker: TextChunker,
    batch_size: usize,
}

impl Vectorize {
    /// Creates a new vectorize stage.
    pub fn new(blobs: Arc<dyn BlobStore>, index: Arc<dyn VectorIndex>, chunker: TextChunker, batch_size: usize) -> Self {
        Self {
            blobs,
            index,
            chunker,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl TypedStage for Vectorize {
    type Output = VectorizationSummary;

    async fn run(&self, inputs: &StageInputs) -> Result<VectorizationSummary, StageError> {
        let upload: UploadCompleted = inputs.require(keys::DOCUMENT)?;
        let extracted: ExtractedMetadata = inputs.require(keys::METADATA)?;
        let text = document_text(self.blobs.as_ref(), inputs).await?;

        let source = ChunkSource {
            document_id: upload.document_id,
            content_id: &extracted.content_id,
            filename: &upload.filename,
            user_id: &upload.owner_id,
            layout_elements: &extracted.metadata.layout_elements,
        };
        let chunks = self.chunker.chunk(&text, &source);
        let vector_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let total_chunks = chunks.len();

        let mut uploaded_vectors = 0;
        for batch in chunks.chunks(self.batch_size) {
            uploaded_vectors += self.index.upsert(batch.to_vec()).await?;
        }

        info!(
            document_id = %upload.document_id,
            total_chunks,
            uploaded_vectors,
            "Document vectorized"
        );
        Ok(VectorizationSummary {
            total_chunks,
            uploaded_vectors,
            vector_ids,
        })
    }
}

/// Returns true when the validated document is a PDF.
#[must_use]
pub fn is_pdf(context: &RunContext) -> bool {
    matches!(
        context.get_typed::<DocumentValidation>(keys::VALIDATION),
        Ok(Some(DocumentValidation {
            document_type: DocumentType::Pdf,
            ..
        }))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;
    use crate::core::StageOutput;
    use crate::errors::PortError;
    use crate::ingestion::chunking::DocumentChunk;
    use crate::ingestion::ports::MockVectorIndex;
    use crate::run::OwnerRef;
    use crate::testing::{FakeBlobStore, FakeDocumentParser};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn upload(filename: &str) -> UploadCompleted {
        UploadCompleted {
            document_id: Uuid::new_v4(),
            blob_url: format!("https://uploads/{filename}"),
            filename: filename.to_string(),
            owner_id: "user-1".to_string(),
        }
    }

    fn inputs(entries: Vec<(&str, serde_json::Value)>, optional: &[&str]) -> StageInputs {
        let mut context = RunContext::new();
        let mut required = BTreeSet::new();
        for (key, value) in entries {
            context.insert(key, StageOutput::new(value)).unwrap();
            required.insert(key.to_string());
        }
        let optional: BTreeSet<String> = optional.iter().map(|k| (*k).to_string()).collect();
        let identity = RunIdentity::new(Uuid::now_v7(), "ingestion", OwnerRef::Document(Uuid::new_v4()));
        context.project(&identity, "stage", &required, &optional).unwrap()
    }

    #[tokio::test]
    async fn test_paths() {
        let upload = upload("report.PDF");
        assert_eq!(
            document_path(&upload, DocumentType::Pdf),
            format!("user-1/documents/{}.pdf", upload.document_id)
        );
        assert_eq!(markdown_path(&upload), format!("user-1/markdown/{}.md", upload.document_id));

        let mut bare = upload.clone();
        bare.filename = "README".into();
        assert!(document_path(&bare, DocumentType::Txt).ends_with(".txt"));
    }

    #[tokio::test]
    async fn test_parse_error_status_is_fatal() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed("https://stored/doc.pdf", b"%PDF".to_vec(), Some("application/pdf"));
        let parser = Arc::new(FakeDocumentParser::failing("corrupt file"));
        let stage = ParseDocument::new(blobs, parser, Duration::ZERO, 3);
        let stored = json!({"url": "https://stored/doc.pdf", "pathname": "p", "size": 4, "content_type": "application/pdf"});

        let err = stage
            .run(&inputs(vec![(keys::DOCUMENT, json!(upload("doc.pdf"))), (keys::STORED_DOCUMENT, stored)], &[]))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.message().contains("corrupt file"));
    }

    #[tokio::test]
    async fn test_parse_succeeds_after_pending_polls() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed("https://stored/doc.pdf", b"%PDF".to_vec(), Some("application/pdf"));
        let parser = Arc::new(FakeDocumentParser::finishing_after(2, "# Parsed"));
        let stage = ParseDocument::new(blobs, parser, Duration::ZERO, 5);
        let stored = json!({"url": "https://stored/doc.pdf", "pathname": "p", "size": 4, "content_type": "application/pdf"});

        let parsed = stage
            .run(&inputs(vec![(keys::DOCUMENT, json!(upload("doc.pdf"))), (keys::STORED_DOCUMENT, stored)], &[]))
            .await
            .unwrap();

        assert_eq!(parsed.markdown, "# Parsed");
        assert_eq!(parsed.polls, 3);
    }

    #[tokio::test]
    async fn test_vectorize_upserts_in_batches() {
        let mut index = MockVectorIndex::new();
        index
            .expect_upsert()
            .times(3)
            .returning(|chunks: Vec<DocumentChunk>| Ok(chunks.len()));
        let blobs = Arc::new(FakeBlobStore::new());
        let stage = Vectorize::new(blobs, Arc::new(index), TextChunker::new(10, 0), 2);
        let upload = upload("notes.md");
        let parsed = json!({"job_id": "j", "markdown": "x".repeat(50), "polls": 1});
        let metadata = json!({
            "content_id": "content-1",
            "metadata": {"title": null, "author": null, "subject": null, "createdAt": null,
                         "modifiedAt": null, "pageCount": 1, "language": null}
        });

        let summary = stage
            .run(&inputs(
                vec![(keys::DOCUMENT, json!(upload)), (keys::METADATA, metadata), (keys::PARSED, parsed)],
                &[],
            ))
            .await
            .unwrap();

        assert_eq!(summary.total_chunks, 5);
        assert_eq!(summary.uploaded_vectors, 5);
        assert_eq!(summary.vector_ids[4], format!("{}_chunk_4", upload.document_id));
    }

    #[tokio::test]
    async fn test_vectorize_propagates_index_outage_as_transient() {
        let mut index = MockVectorIndex::new();
        index
            .expect_upsert()
            .returning(|_| Err(PortError::unavailable("vector-index", "503")));
        let stage = Vectorize::new(Arc::new(FakeBlobStore::new()), Arc::new(index), TextChunker::new(10, 0), 10);
        let parsed = json!({"job_id": "j", "markdown": "some text", "polls": 1});
        let metadata = json!({
            "content_id": "c",
            "metadata": {"title": null, "author": null, "subject": null, "createdAt": null,
                         "modifiedAt": null, "pageCount": 1, "language": null}
        });

        let err = stage
            .run(&inputs(
                vec![(keys::DOCUMENT, json!(upload("a.md"))), (keys::METADATA, metadata), (keys::PARSED, parsed)],
                &[],
            ))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
