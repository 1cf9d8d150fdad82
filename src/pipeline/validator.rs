//! Validation pipeline orchestration.
//!
//! One `validate` call runs retrieval, request building, the reasoning call,
//! parsing and aggregation for a single patient. Concurrent calls share only
//! the read-mostly guideline index and the gateway; every request and report
//! is owned by its own call.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{
    ValidatorConfig, DEFAULT_MAX_RETRIES, DEFAULT_REASONING_TIMEOUT_SECS,
    DEFAULT_RETRIEVAL_TIMEOUT_SECS,
};
use crate::models::{
    Finding, ModelError, ValidationFailure, ValidationReport, ValidationRequest,
    ValidationResponse, SAFETY_DISCLAIMER,
};
use crate::pipeline::rag::retrieval::GuidelineRetriever;
use crate::pipeline::reasoning::gateway::ReasoningGateway;
use crate::pipeline::reasoning::parser::parse_reasoning_output;
use crate::pipeline::reasoning::request::{
    ReasoningRequest, ReasoningRequestBuilder, RequestBudget, OUTPUT_SCHEMA_VERSION,
};
use crate::pipeline::reasoning::{GatewayError, RequestError, SchemaError};
use crate::pipeline::severity::{aggregate, summarize};
use crate::pipeline::storage::types::ScoredChunk;

/// First retry delay; doubles on each further attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Upper bound on any single retry delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ModelError),

    #[error(transparent)]
    Payload(#[from] RequestError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Validation task failed: {0}")]
    Internal(String),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidRequest(_) => "invalid_request",
            ValidationError::Payload(_) => "payload_too_large",
            ValidationError::Gateway(e) => match e {
                GatewayError::Timeout(_) => "gateway_timeout",
                GatewayError::Transient(_) => "gateway_transient",
                GatewayError::Auth(_) => "gateway_auth",
                GatewayError::MalformedRequest(_) => "gateway_malformed_request",
            },
            ValidationError::Schema(_) => "schema_mismatch",
            ValidationError::Internal(_) => "internal",
        }
    }

    /// Whether resubmitting the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ValidationError::Gateway(GatewayError::Transient(_) | GatewayError::Timeout(_))
        )
    }

    pub fn to_failure(&self, patient_id: Option<&str>) -> ValidationFailure {
        ValidationFailure {
            patient_id: patient_id.map(str::to_string),
            kind: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Timeouts, retry policy and request budget for one validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorSettings {
    pub retrieval_timeout: Duration,
    pub reasoning_timeout: Duration,
    /// Retries after the first attempt, transient gateway failures only.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub budget: RequestBudget,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            retrieval_timeout: Duration::from_secs(DEFAULT_RETRIEVAL_TIMEOUT_SECS),
            reasoning_timeout: Duration::from_secs(DEFAULT_REASONING_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            budget: RequestBudget::default(),
        }
    }
}

impl From<&ValidatorConfig> for ValidatorSettings {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            retrieval_timeout: config.retrieval_timeout,
            reasoning_timeout: config.reasoning_timeout,
            max_retries: config.max_retries,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            budget: RequestBudget {
                max_input_tokens: config.input_token_budget,
            },
        }
    }
}

/// Validates active orders against indexed guidelines.
#[derive(Clone)]
pub struct GuidelineValidator {
    retriever: GuidelineRetriever,
    builder: ReasoningRequestBuilder,
    gateway: Arc<dyn ReasoningGateway>,
    settings: ValidatorSettings,
}

impl GuidelineValidator {
    pub fn new(
        retriever: GuidelineRetriever,
        gateway: Arc<dyn ReasoningGateway>,
        settings: ValidatorSettings,
    ) -> Self {
        Self {
            retriever,
            builder: ReasoningRequestBuilder::new(settings.budget),
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Run the full pipeline. Any error means no report may be trusted; an
    /// empty finding list is only ever returned inside a completed report.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationReport, ValidationError> {
        let trace_id = Uuid::new_v4();
        let patient_id = request.patient_id.as_str();
        request.validate()?;

        let diagnosis = request.clinical_context.diagnosis().to_string();
        tracing::info!(
            %trace_id,
            patient_id,
            diagnosis = %diagnosis,
            orders = request.active_orders.len(),
            "Validation started"
        );

        let chunks = self.retrieve(request, &diagnosis, trace_id).await;

        let reasoning_request = self.builder.build(
            patient_id,
            &request.active_orders,
            &request.patient_record,
            &request.clinical_context,
            chunks,
        )?;
        let guidelines_consulted = reasoning_request.consulted_documents();

        let raw = self.invoke_with_retry(reasoning_request, trace_id).await?;

        let parsed = parse_reasoning_output(&raw, OUTPUT_SCHEMA_VERSION).map_err(|e| {
            tracing::error!(%trace_id, patient_id, error = %e, "Reasoning output rejected");
            e
        })?;
        parsed.verify_patient(patient_id)?;

        for finding in &parsed.findings {
            for order_id in &finding.affected_orders {
                if !request.active_orders.contains_id(order_id) {
                    tracing::warn!(
                        %trace_id,
                        patient_id,
                        order_id = %order_id,
                        "Finding references an order id that is not active"
                    );
                }
            }
        }

        let severity = aggregate(&parsed.findings);
        if let Some(stated) = parsed.stated_overall_severity {
            if stated != severity.overall_severity {
                tracing::warn!(
                    %trace_id,
                    stated = %stated,
                    computed = %severity.overall_severity,
                    "Model overall severity disagrees with its findings; using computed level"
                );
            }
        }

        let ungrounded_findings = ungrounded(&parsed.findings, &guidelines_consulted);
        let total_issues_found = parsed.findings.len();

        tracing::info!(
            %trace_id,
            patient_id,
            overall = %severity.overall_severity,
            findings = total_issues_found,
            urgent = severity.requires_urgent_review,
            guidelines = guidelines_consulted.len(),
            ungrounded = ungrounded_findings.len(),
            "Validation completed"
        );

        Ok(ValidationReport {
            patient_id: patient_id.to_string(),
            timestamp: Utc::now(),
            overall_severity: severity.overall_severity,
            summary: summarize(&diagnosis, &severity, !guidelines_consulted.is_empty()),
            reasoning_summary: parsed.summary,
            findings: parsed.findings,
            counts: severity.counts,
            total_issues_found,
            requires_urgent_review: severity.requires_urgent_review,
            low_confidence: guidelines_consulted.is_empty(),
            guidelines_consulted,
            ungrounded_findings,
            output_schema_version: parsed.schema_version,
            safety_disclaimer: SAFETY_DISCLAIMER.to_string(),
        })
    }

    /// `validate`, with failures folded into an explicit rejected response.
    pub async fn respond(&self, request: &ValidationRequest) -> ValidationResponse {
        match self.validate(request).await {
            Ok(report) => ValidationResponse::Completed(report),
            Err(e) => {
                tracing::error!(
                    patient_id = %request.patient_id,
                    kind = e.kind(),
                    error = %e,
                    "Validation rejected"
                );
                let patient_id = Some(request.patient_id.as_str()).filter(|p| !p.trim().is_empty());
                ValidationResponse::Rejected(e.to_failure(patient_id))
            }
        }
    }

    /// Retrieval never fails the validation: errors and timeouts degrade to
    /// an empty guideline set.
    async fn retrieve(
        &self,
        request: &ValidationRequest,
        diagnosis: &str,
        trace_id: Uuid,
    ) -> Vec<ScoredChunk> {
        let retriever = self.retriever.clone();
        let diagnosis = diagnosis.to_string();
        let orders_summary = request.active_orders.summary();
        let specialty = request.effective_specialty();

        let task = tokio::task::spawn_blocking(move || {
            retriever.retrieve(&diagnosis, &orders_summary, specialty.as_deref())
        });

        match tokio::time::timeout(self.settings.retrieval_timeout, task).await {
            Ok(Ok(Ok(retrieved))) => retrieved.chunks,
            Ok(Ok(Err(e))) => {
                tracing::warn!(%trace_id, error = %e, "Guideline retrieval failed; continuing without guidelines");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(%trace_id, error = %e, "Guideline retrieval task failed; continuing without guidelines");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    %trace_id,
                    timeout_ms = self.settings.retrieval_timeout.as_millis() as u64,
                    "Guideline retrieval timed out; continuing without guidelines"
                );
                Vec::new()
            }
        }
    }

    async fn invoke_with_retry(
        &self,
        request: ReasoningRequest,
        trace_id: Uuid,
    ) -> Result<String, ValidationError> {
        let request = Arc::new(request);
        let timeout = self.settings.reasoning_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let gateway = Arc::clone(&self.gateway);
            let call_request = Arc::clone(&request);
            let task =
                tokio::task::spawn_blocking(move || gateway.invoke(&call_request, timeout));

            let outcome = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => return Err(ValidationError::Internal(e.to_string())),
                Err(_) => Err(GatewayError::Timeout(timeout)),
            };

            match outcome {
                Ok(raw) => {
                    tracing::debug!(%trace_id, attempt, model = self.gateway.model(), "Reasoning call succeeded");
                    return Ok(raw);
                }
                Err(e) if e.is_retryable() && attempt <= self.settings.max_retries => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    tracing::warn!(
                        %trace_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient reasoning failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        %trace_id,
                        attempt,
                        kind = e.kind(),
                        error = %e,
                        "Reasoning call failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}

/// Delay before retrying after failed attempt `attempt` (1-based).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

/// Indices of findings whose reference names none of the consulted documents.
fn ungrounded(findings: &[Finding], consulted: &BTreeSet<String>) -> Vec<usize> {
    findings
        .iter()
        .enumerate()
        .filter(|(_, f)| !consulted.iter().any(|doc| f.cites(doc)))
        .map(|(i, _)| i)
        .collect()
}
