use serde::{Deserialize, Serialize};

use super::context::{ClinicalContext, ClinicalNarrative};
use super::orders::ActiveOrders;
use super::ModelError;

/// Validation request as consumed by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub patient_id: String,
    #[serde(default)]
    pub active_orders: ActiveOrders,
    #[serde(default)]
    pub clinical_context: ClinicalNarrative,
    #[serde(default)]
    pub patient_record: ClinicalContext,
    #[serde(default)]
    pub specialty: Option<String>,
}

impl ValidationRequest {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.patient_id.trim().is_empty() {
            return Err(ModelError::MissingPatientId);
        }
        self.active_orders.validate()
    }

    /// Specialty used to filter retrieval: the explicit request value wins,
    /// then the patient's department. Blank values count as absent.
    pub fn effective_specialty(&self) -> Option<String> {
        let normalized = |value: Option<&str>| {
            value
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
        };
        normalized(self.specialty.as_deref())
            .or_else(|| normalized(self.patient_record.department.as_deref()))
    }
}
