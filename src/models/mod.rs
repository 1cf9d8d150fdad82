pub mod enums;
pub mod orders;
pub mod context;
pub mod finding;
pub mod report;
pub mod request;

pub use enums::*;
pub use orders::*;
pub use context::*;
pub use finding::*;
pub use report::*;
pub use request::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid {field} value: '{value}'")]
    InvalidEnum { field: String, value: String },

    #[error("Duplicate order id: {0}")]
    DuplicateOrderId(String),

    #[error("Order without an order_id in {category}")]
    MissingOrderId { category: String },

    #[error("Request has no patient_id")]
    MissingPatientId,
}
