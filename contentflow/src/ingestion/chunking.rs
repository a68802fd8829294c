//! Fixed-window text chunking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::LayoutElement;

/// Characters of a layout element matched against a chunk.
const LAYOUT_MATCH_PREFIX: usize = 50;

/// Metadata attached to every chunk in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Source document.
    pub document_id: Uuid,
    /// Catalog content id.
    pub content_id: String,
    /// Original filename.
    pub filename: String,
    /// Uploading user.
    pub user_id: String,
    /// Position of the chunk.
    pub chunk_index: usize,
    /// Chunk length in characters.
    pub chunk_size: usize,
    /// Layout elements whose text appears in the chunk.
    pub layout_elements: Vec<LayoutElement>,
    /// When the chunk was produced.
    pub created_at: DateTime<Utc>,
}

/// A piece of document text ready for the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `{document}_chunk_{index}`.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Index metadata.
    pub metadata: ChunkMetadata,
}

/// Where chunks come from.
#[derive(Debug, Clone)]
pub struct ChunkSource<'a> {
    /// Source document.
    pub document_id: Uuid,
    /// Catalog content id.
    pub content_id: &'a str,
    /// Original filename.
    pub filename: &'a str,
    /// Uploading user.
    pub user_id: &'a str,
    /// Layout elements to associate with chunks.
    pub layout_elements: &'a [LayoutElement],
}

/// Splits text into overlapping character windows.
///
/// Windows start every `size - overlap` characters until the start passes
/// the end of the text, so the tail is covered by more than one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Creates a chunker. `overlap` is clamped below `size`.
    #[must_use]
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    /// Distance between window starts.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Returns the raw windows.
    #[must_use]
    pub fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        (0..chars.len())
            .step_by(self.step())
            .map(|start| {
                let end = (start + self.size).min(chars.len());
                chars[start..end].iter().collect()
            })
            .collect()
    }

    /// Splits `text` into chunks carrying index metadata.
    #[must_use]
    pub fn chunk(&self, text: &str, source: &ChunkSource<'_>) -> Vec<DocumentChunk> {
        let created_at = Utc::now();
        self.windows(text)
            .into_iter()
            .enumerate()
            .map(|(index, window)| {
                let layout_elements = related_elements(&window, source.layout_elements);
                DocumentChunk {
                    id: format!("{}_chunk_{index}", source.document_id),
                    metadata: ChunkMetadata {
                        document_id: source.document_id,
                        content_id: source.content_id.to_string(),
                        filename: source.filename.to_string(),
                        user_id: source.user_id.to_string(),
                        chunk_index: index,
                        chunk_size: window.chars().count(),
                        layout_elements,
                        created_at,
                    },
                    text: window,
                }
            })
            .collect()
    }
}

fn related_elements(window: &str, elements: &[LayoutElement]) -> Vec<LayoutElement> {
    let haystack = window.to_lowercase();
    elements
        .iter()
        .filter(|element| {
            let prefix: String = element.content.to_lowercase().chars().take(LAYOUT_MATCH_PREFIX).collect();
            !prefix.is_empty() && haystack.contains(&prefix)
        })
        .cloned()
        .collect()
}
