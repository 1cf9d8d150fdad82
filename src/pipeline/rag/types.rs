use serde::Serialize;

use crate::pipeline::storage::types::ScoredChunk;

/// Upper bound on chunks handed to the request builder.
pub const MAX_CHUNKS: usize = 8;
/// Upper bound on chunks from any single source document.
pub const MAX_PER_DOCUMENT: usize = 3;

/// Retrieval tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    pub max_chunks: usize,
    pub max_per_document: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            max_chunks: MAX_CHUNKS,
            max_per_document: MAX_PER_DOCUMENT,
        }
    }
}

/// How a retrieval was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalScope {
    /// Chunks came from the requested specialty.
    Specialty,
    /// The specialty matched nothing; chunks came from the whole index.
    FallbackAll,
    /// No specialty was requested.
    All,
}

/// Guideline chunks selected for one validation, in descending score order.
#[derive(Debug, Clone)]
pub struct RetrievedGuidelines {
    pub query: String,
    pub chunks: Vec<ScoredChunk>,
    pub scope: RetrievalScope,
}

impl RetrievedGuidelines {
    pub fn empty(query: String) -> Self {
        Self {
            query,
            chunks: Vec::new(),
            scope: RetrievalScope::All,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
