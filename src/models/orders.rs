use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::enums::OrderCategory;
use super::ModelError;

/// Keys tried, in order, to find an order's human-readable name.
const LABEL_KEYS: &[&str] = &[
    "name",
    "medication",
    "drug",
    "test",
    "procedure",
    "study",
    "description",
    "type",
];

/// Keys appended after the label in compact summaries.
const QUALIFIER_KEYS: &[&str] = &["dose", "route", "frequency", "timing"];

/// A single active order. `order_id` is mandatory; every other field is a
/// free-form description field kept exactly as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Order {
    pub fn new(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            details: Map::new(),
        }
    }

    /// Builder-style helper for attaching a description field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Best-effort display name, falling back to the order id.
    pub fn label(&self) -> String {
        LABEL_KEYS
            .iter()
            .find_map(|key| self.details.get(*key).and_then(value_text))
            .unwrap_or_else(|| self.order_id.clone())
    }

    /// Label plus dose/route/frequency qualifiers, e.g. `Ceftriaxone 2 g IV`.
    pub fn compact(&self) -> String {
        let mut parts = vec![self.label()];
        for key in QUALIFIER_KEYS {
            if let Some(text) = self.details.get(*key).and_then(value_text) {
                parts.push(text);
            }
        }
        parts.join(" ")
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// All active orders for a patient, grouped by category. Order within each
/// category is preserved as supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveOrders {
    #[serde(default)]
    pub medications: Vec<Order>,
    #[serde(default)]
    pub procedures: Vec<Order>,
    #[serde(default)]
    pub labs: Vec<Order>,
    #[serde(default)]
    pub imaging: Vec<Order>,
}

impl ActiveOrders {
    pub fn category(&self, category: OrderCategory) -> &[Order] {
        match category {
            OrderCategory::Medications => &self.medications,
            OrderCategory::Procedures => &self.procedures,
            OrderCategory::Labs => &self.labs,
            OrderCategory::Imaging => &self.imaging,
        }
    }

    /// Iterate every order with its category, categories in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (OrderCategory, &Order)> {
        OrderCategory::ALL
            .into_iter()
            .flat_map(move |c| self.category(c).iter().map(move |o| (c, o)))
    }

    pub fn len(&self) -> usize {
        self.medications.len() + self.procedures.len() + self.labs.len() + self.imaging.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_id(&self, order_id: &str) -> bool {
        self.iter().any(|(_, o)| o.order_id == order_id)
    }

    /// Reject blank and duplicate order ids. Duplicates are a caller error;
    /// they are never merged.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for (category, order) in self.iter() {
            if order.order_id.trim().is_empty() {
                return Err(ModelError::MissingOrderId {
                    category: category.as_str().to_string(),
                });
            }
            if !seen.insert(order.order_id.as_str()) {
                return Err(ModelError::DuplicateOrderId(order.order_id.clone()));
            }
        }
        Ok(())
    }

    /// Compact one-line-per-category summary used to steer retrieval toward
    /// clinically salient terms rather than raw structured fields.
    pub fn summary(&self) -> String {
        OrderCategory::ALL
            .into_iter()
            .filter(|c| !self.category(*c).is_empty())
            .map(|c| {
                let items = self
                    .category(c)
                    .iter()
                    .map(Order::compact)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", c.as_str(), items)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
