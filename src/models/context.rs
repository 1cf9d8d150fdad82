use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable patient snapshot for one validation request
/// (`patient_record` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalContext {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub allergies: BTreeSet<String>,
    #[serde(default)]
    pub comorbidities: BTreeSet<String>,
    #[serde(default)]
    pub vitals: BTreeMap<String, Value>,
    #[serde(default)]
    pub recent_labs: BTreeMap<String, Value>,
}

/// Free-text clinical narrative (`clinical_context` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalNarrative {
    #[serde(default)]
    pub presentation: Option<String>,
    #[serde(default)]
    pub history: Option<String>,
    #[serde(default)]
    pub physical_exam: Option<String>,
    #[serde(default)]
    pub working_diagnosis: Option<String>,
    #[serde(default)]
    pub care_plan: Option<String>,
}

impl ClinicalNarrative {
    /// Working diagnosis, or `Unknown` when absent or blank.
    pub fn diagnosis(&self) -> &str {
        self.working_diagnosis
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("Unknown")
    }
}
