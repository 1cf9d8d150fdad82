use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::StorageError;

/// Specialty tag of documents that carry none.
pub const DEFAULT_SPECIALTY: &str = "general";

/// A guideline source document after upstream text extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidelineDocument {
    /// File name (or other stable identifier) of the source document.
    pub source_document: String,
    pub specialty: Option<String>,
    pub text: String,
}

impl GuidelineDocument {
    pub fn new(source_document: &str, specialty: Option<&str>, text: &str) -> Self {
        Self {
            source_document: source_document.to_string(),
            specialty: specialty.map(|s| s.to_lowercase()),
            text: text.to_string(),
        }
    }

    /// Lowercased specialty tag; untagged or blank documents are `general`.
    pub fn specialty_tag(&self) -> String {
        self.specialty
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SPECIALTY.to_string())
    }
}

/// An indexed, embedded span of guideline text. Immutable once indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineChunk {
    pub id: String,
    pub source_document: String,
    pub specialty: String,
    pub text: String,
    #[serde(skip)]
    pub embedding_vector: Vec<f32>,
    /// Global insertion order; the retrieval tie-breaker.
    pub sequence: u64,
}

/// A chunk with its similarity score (from an index query).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<GuidelineChunk>,
    pub score: f32,
}

impl ScoredChunk {
    pub fn source_document(&self) -> &str {
        &self.chunk.source_document
    }
}

/// A span of document text produced by a chunker, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Byte offset of the chunk start in the source text.
    pub char_offset: usize,
    pub token_count: usize,
}

/// Chunking strategy trait
pub trait Chunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

/// Embedding model abstraction. Implementations must be deterministic:
/// the same text always yields the same vector.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StorageError>;
    fn dimension(&self) -> usize;
}

/// Allow `Box<dyn EmbeddingModel>` to be used as `&impl EmbeddingModel`.
impl EmbeddingModel for Box<dyn EmbeddingModel> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StorageError> {
        (**self).embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}
