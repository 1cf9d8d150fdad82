use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Severity;
use super::finding::Finding;

/// Fixed decision-support disclaimer attached to every report.
pub const SAFETY_DISCLAIMER: &str = "IMPORTANT: This is an AI-assisted clinical decision support tool. \
All recommendations must be reviewed by a qualified healthcare professional before implementation. \
Do not use for autonomous decision-making. AI systems can make errors; always verify recommendations \
against current guidelines.";

/// Number of findings at each severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub moderate: usize,
    pub low: usize,
    pub routine: usize,
}

impl SeverityCounts {
    pub fn get(&self, level: Severity) -> usize {
        match level {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Moderate => self.moderate,
            Severity::Low => self.low,
            Severity::Routine => self.routine,
        }
    }

    pub fn increment(&mut self, level: Severity) {
        let slot = match level {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Moderate => &mut self.moderate,
            Severity::Low => &mut self.low,
            Severity::Routine => &mut self.routine,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        Severity::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Most urgent level with a non-zero count, ROUTINE when all are zero.
    pub fn highest(&self) -> Severity {
        Severity::ALL
            .into_iter()
            .find(|s| self.get(*s) > 0)
            .unwrap_or(Severity::Routine)
    }
}

/// Terminal artifact of a successful validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub patient_id: String,
    pub timestamp: DateTime<Utc>,
    pub overall_severity: Severity,
    pub summary: String,
    /// Summary text as written by the reasoning model, if it supplied one.
    pub reasoning_summary: Option<String>,
    /// Order preserved from the reasoning output.
    pub findings: Vec<Finding>,
    pub counts: SeverityCounts,
    pub total_issues_found: usize,
    pub requires_urgent_review: bool,
    pub guidelines_consulted: BTreeSet<String>,
    /// Set when no guideline text grounded the validation.
    pub low_confidence: bool,
    /// Indices into `findings` whose reference names no consulted document.
    pub ungrounded_findings: Vec<usize>,
    pub output_schema_version: String,
    pub safety_disclaimer: String,
}

/// Explicit failure, distinguishable on the wire from a zero-finding report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub patient_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

/// Outcome returned to the caller of the validation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ValidationResponse {
    Completed(ValidationReport),
    Rejected(ValidationFailure),
}
