pub mod types;
pub mod chunker;
pub mod embedder;
pub mod index;
pub mod loader;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported guideline format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Guideline document has no text: {0}")]
    EmptyDocument(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Guideline index lock poisoned")]
    LockPoisoned,
}
