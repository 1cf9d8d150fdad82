pub mod request;
pub mod gateway;
pub mod ollama;
pub mod openai;
pub mod parser;

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error(
        "Reasoning request needs ~{estimated_tokens} tokens with no guideline text; budget is {budget}"
    )]
    PayloadTooLarge {
        estimated_tokens: usize,
        budget: usize,
    },

    #[error("Failed to serialize request section: {0}")]
    Serialization(String),
}

/// Failure of a single reasoning call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Reasoning call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Transient reasoning failure: {0}")]
    Transient(String),

    #[error("Reasoning capability rejected credentials: {0}")]
    Auth(String),

    #[error("Reasoning capability rejected the request: {0}")]
    MalformedRequest(String),
}

impl GatewayError {
    /// Only transient failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Transient(_) => "transient",
            GatewayError::Auth(_) => "auth",
            GatewayError::MalformedRequest(_) => "malformed_request",
        }
    }
}

/// Reasoning output that cannot be trusted as a clinical report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Reasoning output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Reasoning output is missing required field '{0}'")]
    MissingField(String),

    #[error("Reasoning output field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unrecognized severity '{value}' at {field}")]
    UnknownSeverity { field: String, value: String },

    #[error("Output schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Reasoning output is for patient {actual}, expected {expected}")]
    PatientMismatch { expected: String, actual: String },
}
