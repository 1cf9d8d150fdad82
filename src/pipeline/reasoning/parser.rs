use std::str::FromStr;

use serde_json::{Map, Value};

use super::SchemaError;
use crate::models::{Finding, Severity};

/// Reasoning output after validation, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub schema_version: String,
    pub patient_id: Option<String>,
    /// The model's own overall level. Informational; aggregation recomputes it.
    pub stated_overall_severity: Option<Severity>,
    /// In the order the model returned them.
    pub findings: Vec<Finding>,
    pub summary: Option<String>,
}

impl ParsedResponse {
    /// Reject output that names a different patient than the request.
    pub fn verify_patient(&self, expected: &str) -> Result<(), SchemaError> {
        match &self.patient_id {
            Some(actual) if actual.trim() != expected.trim() => Err(SchemaError::PatientMismatch {
                expected: expected.to_string(),
                actual: actual.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Validate raw reasoning output against the versioned schema and convert it
/// into typed findings. Nothing is coerced: a missing field, a wrong type or
/// an unrecognized severity rejects the whole output.
pub fn parse_reasoning_output(
    raw: &str,
    expected_version: &str,
) -> Result<ParsedResponse, SchemaError> {
    let trimmed = raw.trim();
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => serde_json::from_str(extract_json(trimmed))
            .map_err(|e| SchemaError::InvalidJson(e.to_string()))?,
    };
    let root = value.as_object().ok_or_else(|| SchemaError::InvalidField {
        field: "$".into(),
        reason: "expected a JSON object".into(),
    })?;

    let schema_version = required_str(root, "schema_version", "schema_version")?;
    if schema_version.trim() != expected_version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version.to_string(),
            actual: schema_version,
        });
    }

    let patient_id = optional_str(root, "patient_id", "patient_id")?;
    let summary = optional_str(root, "summary", "summary")?;
    let stated_overall_severity = optional_str(root, "overall_severity", "overall_severity")?
        .map(|s| parse_severity(&s, "overall_severity"))
        .transpose()?;

    let items = root
        .get("findings")
        .ok_or_else(|| SchemaError::MissingField("findings".into()))?
        .as_array()
        .ok_or_else(|| invalid("findings", "expected an array"))?;

    let findings = items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_finding(item, i))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(findings = findings.len(), "Reasoning output parsed");

    Ok(ParsedResponse {
        schema_version,
        patient_id,
        stated_overall_severity,
        findings,
        summary,
    })
}

fn parse_finding(item: &Value, index: usize) -> Result<Finding, SchemaError> {
    let path = |field: &str| format!("findings[{index}].{field}");
    let obj = item
        .as_object()
        .ok_or_else(|| invalid(&format!("findings[{index}]"), "expected an object"))?;

    let issue = required_str(obj, "issue", &path("issue"))?;
    if issue.trim().is_empty() {
        return Err(invalid(&path("issue"), "must not be empty"));
    }
    let reasoning = required_str(obj, "reasoning", &path("reasoning"))?;
    let severity = parse_severity(&required_str(obj, "severity", &path("severity"))?, &path("severity"))?;

    let recommendations = string_array(
        obj.get("recommendations")
            .ok_or_else(|| SchemaError::MissingField(path("recommendations")))?,
        &path("recommendations"),
    )?;

    let guideline_reference = optional_str(obj, "guideline_reference", &path("guideline_reference"))?
        .filter(|r| !r.trim().is_empty());

    let requires_human_review = obj
        .get("requires_human_review")
        .ok_or_else(|| SchemaError::MissingField(path("requires_human_review")))?
        .as_bool()
        .ok_or_else(|| invalid(&path("requires_human_review"), "expected a boolean"))?;

    let affected_orders = match obj.get("affected_orders") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => string_array(value, &path("affected_orders"))?,
    };

    Ok(Finding {
        issue,
        reasoning,
        severity,
        recommendations,
        guideline_reference,
        requires_human_review,
        affected_orders,
    })
}

fn parse_severity(value: &str, field: &str) -> Result<Severity, SchemaError> {
    Severity::from_str(value).map_err(|_| SchemaError::UnknownSeverity {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn invalid(field: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn required_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, SchemaError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(SchemaError::MissingField(path.to_string())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(invalid(path, "expected a string")),
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, SchemaError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(path, "expected a string or null")),
    }
}

fn string_array(value: &Value, path: &str) -> Result<Vec<String>, SchemaError> {
    value
        .as_array()
        .ok_or_else(|| invalid(path, "expected an array of strings"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(path, "expected an array of strings"))
        })
        .collect()
}

/// The JSON object inside `raw`, for output that did not parse as-is:
/// a Markdown code fence (with or without a language tag) or prose around
/// the object.
fn extract_json(raw: &str) -> &str {
    let mut candidate = raw;
    if let Some(start) = raw.find("```") {
        let body = raw[start + 3..]
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        candidate = match body.rfind("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }
    let candidate = candidate.trim();
    match (candidate.find('{'), candidate.rfind('}')) {
        (Some(start), Some(end)) if start < end => &candidate[start..=end],
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: &str = "guideline-check/v1";

    fn finding_json(severity: &str) -> String {
        format!(
            r#"{{
                "issue": "Missing broad-spectrum antibiotics",
                "reasoning": "Hour-1 Bundle requires antibiotics within one hour",
                "severity": "{severity}",
                "recommendations": ["Order piperacillin-tazobactam now"],
                "guideline_reference": "surviving_sepsis.txt",
                "requires_human_review": true,
                "affected_orders": ["MED-001"]
            }}"#
        )
    }

    fn response(findings: &[String]) -> String {
        format!(
            r#"{{"schema_version": "{V}", "patient_id": "P-001", "overall_severity": "critical",
                "findings": [{}], "summary": "Antibiotics missing."}}"#,
            findings.join(",")
        )
    }

    #[test]
    fn parses_valid_output() {
        let parsed = parse_reasoning_output(&response(&[finding_json("critical")]), V).unwrap();
        assert_eq!(parsed.findings.len(), 1);
        let f = &parsed.findings[0];
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.guideline_reference.as_deref(), Some("surviving_sepsis.txt"));
        assert_eq!(f.affected_orders, vec!["MED-001"]);
        assert_eq!(parsed.stated_overall_severity, Some(Severity::Critical));
        assert_eq!(parsed.summary.as_deref(), Some("Antibiotics missing."));
        assert!(parsed.verify_patient("P-001").is_ok());
    }

    #[test]
    fn severity_match_is_case_insensitive() {
        let parsed = parse_reasoning_output(
            &response(&[finding_json("HIGH"), finding_json(" Moderate ")]),
            V,
        )
        .unwrap();
        assert_eq!(parsed.findings[0].severity, Severity::High);
        assert_eq!(parsed.findings[1].severity, Severity::Moderate);
    }

    #[test]
    fn unknown_severity_is_rejected_not_coerced() {
        let err = parse_reasoning_output(
            &response(&[finding_json("high"), finding_json("urgent")]),
            V,
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownSeverity {
                field: "findings[1].severity".into(),
                value: "urgent".into()
            }
        );
    }

    #[test]
    fn findings_keep_source_order() {
        let parsed = parse_reasoning_output(
            &response(&[finding_json("low"), finding_json("critical"), finding_json("routine")]),
            V,
        )
        .unwrap();
        let levels: Vec<_> = parsed.findings.iter().map(|f| f.severity).collect();
        assert_eq!(levels, vec![Severity::Low, Severity::Critical, Severity::Routine]);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let finding = finding_json("high").replace(r#""requires_human_review": true,"#, "");
        let err = parse_reasoning_output(&response(&[finding]), V).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField("findings[0].requires_human_review".into())
        );

        let err = parse_reasoning_output(&format!(r#"{{"schema_version": "{V}"}}"#), V).unwrap_err();
        assert_eq!(err, SchemaError::MissingField("findings".into()));
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let finding = finding_json("high").replace(
            r#"["Order piperacillin-tazobactam now"]"#,
            r#""Order piperacillin-tazobactam now""#,
        );
        let err = parse_reasoning_output(&response(&[finding]), V).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { ref field, .. } if field == "findings[0].recommendations"));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let raw = response(&[]).replace(V, "guideline-check/v0");
        let err = parse_reasoning_output(&raw, V).unwrap_err();
        assert!(matches!(err, SchemaError::VersionMismatch { .. }));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            parse_reasoning_output("not json at all", V),
            Err(SchemaError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_reasoning_output("[1, 2]", V),
            Err(SchemaError::InvalidField { .. })
        ));
    }

    #[test]
    fn code_fence_and_prose_are_tolerated() {
        let fenced = format!("```json\n{}\n```", response(&[]));
        assert!(parse_reasoning_output(&fenced, V).unwrap().findings.is_empty());

        let prose = format!("Here is the result: {} Done.", response(&[]));
        assert!(parse_reasoning_output(&prose, V).is_ok());
    }

    #[test]
    fn bare_json_containing_a_fence_is_parsed_as_is() {
        let finding = finding_json("moderate").replace(
            "Hour-1 Bundle requires antibiotics within one hour",
            "see ```code``` here",
        );
        let parsed = parse_reasoning_output(&response(&[finding]), V).unwrap();
        assert_eq!(parsed.findings[0].reasoning, "see ```code``` here");
    }

    #[test]
    fn fence_without_newline_is_tolerated() {
        let inline = format!("```json{}```", response(&[finding_json("low")]));
        assert_eq!(parse_reasoning_output(&inline, V).unwrap().findings.len(), 1);

        let untagged = format!("```{}```", response(&[]));
        assert!(parse_reasoning_output(&untagged, V).is_ok());
    }

    #[test]
    fn null_reference_and_absent_affected_orders_are_allowed() {
        let finding = finding_json("low")
            .replace(r#""surviving_sepsis.txt""#, "null")
            .replace(r#""affected_orders": ["MED-001"]"#, r#""affected_orders": null"#);
        let parsed = parse_reasoning_output(&response(&[finding]), V).unwrap();
        assert_eq!(parsed.findings[0].guideline_reference, None);
        assert!(parsed.findings[0].affected_orders.is_empty());
    }

    #[test]
    fn duplicate_findings_are_kept_distinct() {
        let parsed = parse_reasoning_output(
            &response(&[finding_json("high"), finding_json("high")]),
            V,
        )
        .unwrap();
        assert_eq!(parsed.findings.len(), 2);
        assert_eq!(parsed.findings[0], parsed.findings[1]);
    }

    #[test]
    fn empty_findings_is_a_valid_zero_finding_output() {
        let parsed = parse_reasoning_output(&response(&[]), V).unwrap();
        assert!(parsed.findings.is_empty());
    }

    #[test]
    fn other_patient_is_rejected() {
        let parsed = parse_reasoning_output(&response(&[]), V).unwrap();
        assert!(matches!(
            parsed.verify_patient("P-002"),
            Err(SchemaError::PatientMismatch { .. })
        ));
    }

    #[test]
    fn unknown_overall_severity_is_rejected() {
        let raw = response(&[]).replace(r#""overall_severity": "critical""#, r#""overall_severity": "severe""#);
        assert!(matches!(
            parse_reasoning_output(&raw, V),
            Err(SchemaError::UnknownSeverity { .. })
        ));
    }
}
