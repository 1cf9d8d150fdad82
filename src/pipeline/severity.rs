//! Severity aggregation.
//!
//! Pure functions over a finding set: identical findings always produce an
//! identical aggregate, whatever the upstream reasoning did.

use serde::Serialize;

use crate::models::{Finding, Severity, SeverityCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeverityAggregate {
    pub overall_severity: Severity,
    pub counts: SeverityCounts,
    pub requires_urgent_review: bool,
}

/// Overall level is the most urgent level present (ROUTINE when there are no
/// findings); urgent review is required iff any finding is CRITICAL or HIGH.
pub fn aggregate(findings: &[Finding]) -> SeverityAggregate {
    let mut counts = SeverityCounts::default();
    for finding in findings {
        counts.increment(finding.severity);
    }

    let overall_severity = findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Routine);

    SeverityAggregate {
        overall_severity,
        counts,
        requires_urgent_review: findings.iter().any(|f| f.severity.is_urgent()),
    }
}

const NO_GUIDELINES_NOTE: &str =
    " No guidelines were consulted; low confidence, clinical review required.";

/// Human-readable report summary built from the aggregate and whether any
/// guideline text backed the review.
pub fn summarize(diagnosis: &str, aggregate: &SeverityAggregate, guidelines_consulted: bool) -> String {
    let counts = &aggregate.counts;
    let total = counts.total();

    if total == 0 {
        if !guidelines_consulted {
            return format!("No issues identified for {diagnosis}.{NO_GUIDELINES_NOTE}");
        }
        return format!(
            "No issues identified for {diagnosis}. Active orders are consistent with the consulted guidelines."
        );
    }

    let plural = if total == 1 { "issue" } else { "issues" };
    let mut summary = format!("Identified {total} {plural} for {diagnosis}.");

    if counts.critical > 0 {
        summary.push_str(&format!(
            " {} CRITICAL issue(s) require immediate attention.",
            counts.critical
        ));
    }
    if counts.high > 0 {
        summary.push_str(&format!(
            " {} HIGH priority issue(s) require urgent review.",
            counts.high
        ));
    }
    if !aggregate.requires_urgent_review {
        summary.push_str(&format!(
            " Highest severity: {}.",
            aggregate.overall_severity.label()
        ));
    }
    if !guidelines_consulted {
        summary.push_str(NO_GUIDELINES_NOTE);
    }
    summary
}
