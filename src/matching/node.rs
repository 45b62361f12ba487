//! Boolean match expressions over a whole event.

use super::validate::Validatable;
use super::value::MatchValue;
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use serde::Deserialize;
use serde_json::Value;

/// Node of a match expression tree.
///
/// Decoded from an object keyed by `and`, `or`, `not` or `property` +
/// `value`, checked in that order. The first key present decides the
/// variant; malformed payloads and unknown shapes decode to `Invalid`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum MatchNode {
    And(Vec<MatchNode>),
    Or(Vec<MatchNode>),
    Not(Box<MatchNode>),
    Property { property: String, value: MatchValue },
    Invalid(Value),
}

fn decode_children(value: &Value) -> Option<Vec<MatchNode>> {
    value
        .as_array()
        .map(|items| items.iter().cloned().map(MatchNode::from).collect())
}

impl From<Value> for MatchNode {
    fn from(raw: Value) -> Self {
        let decoded = match raw.as_object() {
            Some(object) => {
                if let Some(v) = object.get("and") {
                    decode_children(v).map(MatchNode::And)
                } else if let Some(v) = object.get("or") {
                    decode_children(v).map(MatchNode::Or)
                } else if let Some(v) = object.get("not") {
                    v.is_object()
                        .then(|| MatchNode::Not(Box::new(MatchNode::from(v.clone()))))
                } else if let Some(v) = object.get("property") {
                    match (v.as_str(), object.get("value")) {
                        (Some(property), Some(value)) => Some(MatchNode::Property {
                            property: property.to_string(),
                            value: MatchValue::from(value.clone()),
                        }),
                        _ => None,
                    }
                } else {
                    None
                }
            }
            None => None,
        };
        decoded.unwrap_or(MatchNode::Invalid(raw))
    }
}

impl MatchNode {
    /// Shorthand for a property comparison node.
    pub fn property(property: impl Into<String>, value: MatchValue) -> Self {
        MatchNode::Property {
            property: property.into(),
            value,
        }
    }

    /// Evaluates the expression against an event. Pure and total: missing
    /// properties and invalid nodes evaluate to false.
    ///
    /// Properties are looked up in the full bag, including ones currently
    /// excluded from transmission.
    pub fn is_match(&self, event: &TelemetryEvent) -> bool {
        match self {
            MatchNode::And(children) => children.iter().all(|c| c.is_match(event)),
            MatchNode::Or(children) => children.iter().any(|c| c.is_match(event)),
            MatchNode::Not(child) => !child.is_match(event),
            MatchNode::Property { property, value } => {
                value.is_match(event.properties().get(property))
            }
            MatchNode::Invalid(_) => false,
        }
    }
}

impl Validatable for MatchNode {
    fn validate_self(&self) -> Result<()> {
        match self {
            MatchNode::And(children) if children.is_empty() => {
                Err(TelemetryError::validation("empty and-clause"))
            }
            MatchNode::Or(children) if children.is_empty() => {
                Err(TelemetryError::validation("empty or-clause"))
            }
            MatchNode::Property { property, .. } if property.is_empty() => {
                Err(TelemetryError::validation("empty property name"))
            }
            MatchNode::Invalid(raw) => Err(TelemetryError::validation(format!(
                "unrecognized match expression {}",
                raw
            ))),
            _ => Ok(()),
        }
    }

    fn children(&self) -> Vec<&dyn Validatable> {
        match self {
            MatchNode::And(children) | MatchNode::Or(children) => {
                children.iter().map(|c| c as &dyn Validatable).collect()
            }
            MatchNode::Not(child) => vec![child.as_ref() as &dyn Validatable],
            MatchNode::Property { value, .. } => vec![value as &dyn Validatable],
            MatchNode::Invalid(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::validate_tree;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> MatchNode {
        serde_json::from_value(value).unwrap()
    }

    fn build_event() -> TelemetryEvent {
        TelemetryEvent::new("Op/Build")
            .unwrap()
            .with_property("VS.Core.SKU", "Pro")
            .unwrap()
            .with_property("Duration", 120)
            .unwrap()
    }

    #[test]
    fn test_property_match_is_case_insensitive_on_name_and_value() {
        let node = decode(json!({"property": "vs.core.sku", "value": {"eq": "pro"}}));
        assert!(node.is_match(&build_event()));
    }

    #[test]
    fn test_connectives() {
        let event = build_event();
        let sku = json!({"property": "VS.Core.SKU", "value": {"eq": "Pro"}});
        let slow = json!({"property": "Duration", "value": {"gt": 100}});
        let fast = json!({"property": "Duration", "value": {"lt": 100}});

        assert!(decode(json!({"and": [sku, slow]})).is_match(&event));
        assert!(!decode(json!({"and": [sku, fast]})).is_match(&event));
        assert!(decode(json!({"or": [fast, sku]})).is_match(&event));
        assert!(decode(json!({"not": fast})).is_match(&event));
    }

    #[test]
    fn test_missing_property_is_false() {
        let node = decode(json!({"property": "Missing", "value": {"eq": "x"}}));
        assert!(!node.is_match(&build_event()));

        let empty = TelemetryEvent::new("Op/Empty").unwrap();
        assert!(!node.is_match(&empty));
        assert!(decode(json!({"not": node_json_missing()})).is_match(&empty));
    }

    fn node_json_missing() -> serde_json::Value {
        json!({"property": "Missing", "value": {"exists": true}})
    }

    #[test]
    fn test_unknown_shapes_decode_to_invalid() {
        assert!(matches!(decode(json!({"xor": []})), MatchNode::Invalid(_)));
        assert!(matches!(decode(json!({"and": 5})), MatchNode::Invalid(_)));
        assert!(matches!(decode(json!({"property": "a"})), MatchNode::Invalid(_)));
        assert!(!decode(json!({"xor": []})).is_match(&build_event()));
    }

    #[test]
    fn test_tree_validation_reports_failing_construct() {
        let err = validate_tree(&decode(json!({"and": []}))).unwrap_err();
        assert!(err.to_string().contains("empty and-clause"));

        let nested = decode(json!({
            "or": [
                {"property": "a", "value": {"eq": "b"}},
                {"not": {"property": "c", "value": {"startsWith": ""}}}
            ]
        }));
        let err = validate_tree(&nested).unwrap_err();
        assert!(err.to_string().contains("empty startsWith"));

        let bad_not = decode(json!({"not": [{"property": "a", "value": {"eq": "b"}}]}));
        assert!(validate_tree(&bad_not).is_err());
    }

    #[test]
    fn test_valid_tree_passes() {
        let node = decode(json!({
            "and": [
                {"property": "a", "value": {"exists": true}},
                {"or": [{"property": "b", "value": {"contains": "x"}}]}
            ]
        }));
        assert!(validate_tree(&node).is_ok());
    }
}
