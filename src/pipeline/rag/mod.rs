pub mod types;
pub mod retrieval;

use thiserror::Error;

use crate::pipeline::storage::StorageError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Guideline index error: {0}")]
    Index(#[from] StorageError),

    #[error("Retrieval query is empty")]
    EmptyQuery,
}
