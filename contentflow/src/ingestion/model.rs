//! Ingestion trigger, stage contracts and document metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Emitted by the upload surface once a document's bytes are in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCompleted {
    /// The document entity.
    pub document_id: Uuid,
    /// Where the uploaded bytes can be fetched.
    pub blob_url: String,
    /// Original filename, including extension.
    pub filename: String,
    /// The uploading user.
    pub owner_id: String,
}

impl UploadCompleted {
    /// Lowercased extension of the filename, if it has one.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Coarse document classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Portable document format; parsed to markdown.
    Pdf,
    /// Word document.
    Docx,
    /// Plain text.
    Txt,
    /// Anything else.
    Other,
}

impl DocumentType {
    /// Classifies by content type first, then by extension.
    #[must_use]
    pub fn detect(content_type: Option<&str>, extension: Option<&str>) -> Self {
        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        let extension = extension.unwrap_or_default();
        if content_type.contains("pdf") || extension == "pdf" {
            Self::Pdf
        } else if content_type.contains("wordprocessingml") || extension == "docx" {
            Self::Docx
        } else if content_type.contains("text") || extension == "txt" {
            Self::Txt
        } else {
            Self::Other
        }
    }

    /// Extension used when the filename has none.
    #[must_use]
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_extension())
    }
}

/// Output of `validate_document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentValidation {
    /// Detected type.
    pub document_type: DocumentType,
    /// Content type reported by the blob store.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Lowercased filename extension.
    #[serde(default)]
    pub file_extension: Option<String>,
}

/// Output of `store_document` and `store_markdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    /// Public URL of the stored blob.
    pub url: String,
    /// Path within the store.
    pub pathname: String,
    /// Size in bytes.
    pub size: u64,
    /// Content type the blob was stored with.
    pub content_type: String,
}

/// Output of `parse_document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// The parser's job id.
    pub job_id: String,
    /// Parsed markdown.
    pub markdown: String,
    /// Status polls it took.
    pub polls: u32,
}

/// Layout element categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutElementType {
    /// Heading.
    Header,
    /// Body text.
    Paragraph,
    /// Table.
    Table,
    /// List.
    List,
    /// Image or figure.
    Image,
    /// Page footer.
    Footer,
}

/// Estimated position of a layout element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
    /// Page number.
    pub page: u32,
}

/// A structural element of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutElement {
    /// Category.
    #[serde(rename = "type")]
    pub element_type: LayoutElementType,
    /// Text content.
    pub content: String,
    /// Estimated position.
    pub bounding_box: BoundingBox,
    /// Free-form extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Metadata the extractor must return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Title.
    pub title: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// Subject.
    pub subject: Option<String>,
    /// Keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Creation date as reported.
    pub created_at: Option<String>,
    /// Modification date as reported.
    pub modified_at: Option<String>,
    /// Number of pages.
    pub page_count: u32,
    /// Language.
    pub language: Option<String>,
    /// Layout elements.
    #[serde(default)]
    pub layout_elements: Vec<LayoutElement>,
}

impl DocumentMetadata {
    /// JSON schema handed to the extractor.
    #[must_use]
    pub fn schema() -> serde_json::Value {
        let nullable = serde_json::json!({"type": ["string", "null"]});
        serde_json::json!({
            "type": "object",
            "required": ["title", "author", "subject", "createdAt", "modifiedAt", "pageCount", "language"],
            "properties": {
                "title": nullable,
                "author": nullable,
                "subject": nullable,
                "keywords": {"type": "array", "items": {"type": "string"}},
                "createdAt": nullable,
                "modifiedAt": nullable,
                "pageCount": {"type": "integer", "minimum": 0},
                "language": nullable,
                "layoutElements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["type", "content", "boundingBox"],
                        "properties": {
                            "type": {"enum": ["header", "paragraph", "table", "list", "image", "footer"]},
                            "content": {"type": "string"},
                            "boundingBox": {
                                "type": "object",
                                "required": ["x", "y", "width", "height", "page"],
                            },
                            "metadata": {"type": "object"},
                        },
                    },
                },
            },
        })
    }
}

/// Output of `extract_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    /// Catalog id of the recorded content.
    pub content_id: String,
    /// The validated metadata.
    pub metadata: DocumentMetadata,
}

/// Output of `vectorize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorizationSummary {
    /// Chunks produced.
    pub total_chunks: usize,
    /// Vectors the index accepted.
    pub uploaded_vectors: usize,
    /// Chunk ids in order.
    pub vector_ids: Vec<String>,
}
