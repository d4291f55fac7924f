//! Disruption events extracted from incident reports.
//!
//! Model output is loosely typed: list fields sometimes come back as bare
//! strings, times as null, ids as numbers. [`DisruptionEvent::from_value`]
//! coerces all of that into the strict shape below.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Placeholder words models use for missing data. Never stored.
const UNKNOWN_MARKERS: &[&str] = &["unknown", "n/a", "none", "null"];

/// A single disruption detected in a source document.
///
/// Multi-valued fields are ordered lists and may be empty; they never hold
/// an empty string or an "unknown" sentinel. Immutable once emitted by the
/// extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisruptionEvent {
    /// Identifier assigned by the model (or derived, see `from_value`)
    pub event_id: String,

    /// Weather, Threat, Crew, Traffic, MechanicalFailure, Other
    #[serde(default)]
    pub event_type: Vec<String>,

    /// Low, Medium, High, Critical
    #[serde(default)]
    pub severity: Vec<String>,

    /// Short factual impact phrases
    #[serde(default)]
    pub impact_description: Vec<String>,

    /// IATA airport codes
    #[serde(default)]
    pub airport_code: Vec<String>,

    /// `YYYY-MM-DD HH:MM` or empty
    #[serde(default)]
    pub start_time: String,

    /// `YYYY-MM-DD HH:MM`, or empty for open-ended ranges
    #[serde(default)]
    pub end_time: String,

    /// Suggested operational actions
    #[serde(default)]
    pub actions: Vec<String>,
}

impl DisruptionEvent {
    /// Coerce one element of a model-produced event array.
    ///
    /// Returns `None` for anything that is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let list = |key: &str| obj.get(key).map(coerce_list).unwrap_or_default();
        let scalar = |key: &str| obj.get(key).and_then(coerce_scalar).unwrap_or_default();

        let impact_description = list("impact_description");
        let event_id = obj
            .get("event_id")
            .and_then(coerce_scalar)
            .unwrap_or_else(|| fallback_event_id(&impact_description));

        Some(Self {
            event_id,
            event_type: list("event_type"),
            severity: list("severity"),
            impact_description,
            airport_code: list("airport_code"),
            start_time: scalar("start_time"),
            end_time: scalar("end_time"),
            actions: list("actions"),
        })
    }

    /// The leading severity, stored as the decision's severity column
    pub fn primary_severity(&self) -> Option<&str> {
        self.severity.first().map(String::as_str)
    }

    /// Serialize to a JSON value for persistence and handler payloads
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Event id used when the model omits one: first ten characters of the
/// first impact phrase, else a fresh UUID.
fn fallback_event_id(impact: &[String]) -> String {
    match impact.first() {
        Some(first) => first.chars().take(10).collect(),
        None => Uuid::new_v4().to_string(),
    }
}

fn coerce_scalar(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };

    if text.is_empty() || UNKNOWN_MARKERS.contains(&text.to_lowercase().as_str()) {
        None
    } else {
        Some(text)
    }
}

fn coerce_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(coerce_scalar).collect(),
        other => coerce_scalar(other).into_iter().collect(),
    }
}
