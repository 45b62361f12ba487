//! Atomic comparison predicates over a single property value.

use super::validate::Validatable;
use crate::error::{Result, TelemetryError};
use crate::property::{eq_ignore_case, fold_case, PropertyValue};
use serde::Deserialize;
use serde_json::Value;

/// Comparison applied to one property value.
///
/// Decoded from an object keyed by the comparison name (`eq`, `lt`, `gt`,
/// `exists`, `startsWith`, `endsWith`, `contains`), checked in that order.
/// The first key present decides the variant; a malformed payload or an
/// unknown shape decodes to `Invalid` and fails validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum MatchValue {
    Eq(String),
    Lt(f64),
    Gt(f64),
    Exists(bool),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    Invalid(Value),
}

impl From<Value> for MatchValue {
    fn from(raw: Value) -> Self {
        let decoded = match raw.as_object() {
            Some(object) => {
                if let Some(v) = object.get("eq") {
                    v.as_str().map(|s| MatchValue::Eq(s.to_string()))
                } else if let Some(v) = object.get("lt") {
                    v.as_f64().map(MatchValue::Lt)
                } else if let Some(v) = object.get("gt") {
                    v.as_f64().map(MatchValue::Gt)
                } else if let Some(v) = object.get("exists") {
                    v.as_bool().map(MatchValue::Exists)
                } else if let Some(v) = object.get("startsWith") {
                    v.as_str().map(|s| MatchValue::StartsWith(s.to_string()))
                } else if let Some(v) = object.get("endsWith") {
                    v.as_str().map(|s| MatchValue::EndsWith(s.to_string()))
                } else if let Some(v) = object.get("contains") {
                    v.as_str().map(|s| MatchValue::Contains(s.to_string()))
                } else {
                    None
                }
            }
            None => None,
        };
        decoded.unwrap_or(MatchValue::Invalid(raw))
    }
}

impl MatchValue {
    /// Evaluates the predicate. A missing property only satisfies nothing;
    /// non-numeric values never satisfy `Lt`/`Gt`.
    pub fn is_match(&self, value: Option<&PropertyValue>) -> bool {
        let value = match (self, value) {
            (MatchValue::Exists(_), found) => return found.is_some(),
            (_, None) => return false,
            (_, Some(value)) => value,
        };

        match self {
            MatchValue::Eq(expected) => eq_ignore_case(&value.match_text(), expected),
            MatchValue::Lt(bound) => value.as_number().map_or(false, |n| n < *bound),
            MatchValue::Gt(bound) => value.as_number().map_or(false, |n| n > *bound),
            MatchValue::StartsWith(prefix) => {
                fold_case(&value.match_text()).starts_with(&*fold_case(prefix))
            }
            MatchValue::EndsWith(suffix) => {
                fold_case(&value.match_text()).ends_with(&*fold_case(suffix))
            }
            MatchValue::Contains(needle) => {
                fold_case(&value.match_text()).contains(&*fold_case(needle))
            }
            MatchValue::Exists(_) | MatchValue::Invalid(_) => false,
        }
    }
}

impl Validatable for MatchValue {
    fn validate_self(&self) -> Result<()> {
        match self {
            MatchValue::Eq(_) => Ok(()),
            MatchValue::Lt(n) if !n.is_finite() => {
                Err(TelemetryError::validation("non-finite lt bound"))
            }
            MatchValue::Gt(n) if !n.is_finite() => {
                Err(TelemetryError::validation("non-finite gt bound"))
            }
            MatchValue::Lt(_) | MatchValue::Gt(_) => Ok(()),
            MatchValue::Exists(true) => Ok(()),
            MatchValue::Exists(false) => Err(TelemetryError::validation("exists must be true")),
            MatchValue::StartsWith(s) if s.is_empty() => {
                Err(TelemetryError::validation("empty startsWith"))
            }
            MatchValue::EndsWith(s) if s.is_empty() => {
                Err(TelemetryError::validation("empty endsWith"))
            }
            MatchValue::Contains(s) if s.is_empty() => {
                Err(TelemetryError::validation("empty contains"))
            }
            MatchValue::StartsWith(_) | MatchValue::EndsWith(_) | MatchValue::Contains(_) => Ok(()),
            MatchValue::Invalid(raw) => Err(TelemetryError::validation(format!(
                "unrecognized match value {}",
                raw
            ))),
        }
    }
}
