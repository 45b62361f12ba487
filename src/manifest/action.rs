//! Manifest actions as authored in the document.

use super::route::RouteTarget;
use crate::error::{Result, TelemetryError};
use crate::matching::{MatchNode, Validatable};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Wildcard channel id: excluding it removes the event from every channel.
pub const ALL_CHANNELS: &str = "*";

/// Variant-specific payload of a manifest action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Exclude { channels: Vec<String> },
    OptOutIncludeEvents(Vec<String>),
    OptOutExcludeEvents(Vec<String>),
    OptOutIncludeProperties(Vec<String>),
    OptOutExcludeProperties(Vec<String>),
    Throttle(bool),
    DoNotThrottle(bool),
    Pii(Vec<String>),
    Route(Vec<RouteTarget>),
    Invalid(Value),
}

impl ActionKind {
    /// Document key the variant is decoded from.
    pub fn key(&self) -> &'static str {
        match self {
            ActionKind::Exclude { .. } => "excludeForChannels",
            ActionKind::OptOutIncludeEvents(_) => "optOutIncludeEvents",
            ActionKind::OptOutExcludeEvents(_) => "optOutExcludeEvents",
            ActionKind::OptOutIncludeProperties(_) => "optOutIncludeProperties",
            ActionKind::OptOutExcludeProperties(_) => "optOutExcludeProperties",
            ActionKind::Throttle(_) => "throttle",
            ActionKind::DoNotThrottle(_) => "doNotThrottle",
            ActionKind::Pii(_) => "piiProperties",
            ActionKind::Route(_) => "route",
            ActionKind::Invalid(_) => "invalid",
        }
    }

    pub fn is_opt_out(&self) -> bool {
        matches!(
            self,
            ActionKind::OptOutIncludeEvents(_)
                | ActionKind::OptOutExcludeEvents(_)
                | ActionKind::OptOutIncludeProperties(_)
                | ActionKind::OptOutExcludeProperties(_)
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A rule of the manifest: an optional `when` predicate and a payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub struct ManifestAction {
    pub when: Option<MatchNode>,
    pub kind: ActionKind,
}

fn decode_names(value: &Value) -> Option<Vec<String>> {
    serde_json::from_value(value.clone()).ok()
}

fn decode_targets(value: &Value) -> Option<Vec<RouteTarget>> {
    value
        .as_array()
        .map(|items| items.iter().cloned().map(RouteTarget::from).collect())
}

impl From<Value> for ManifestAction {
    fn from(raw: Value) -> Self {
        let object = match raw.as_object() {
            Some(object) => object,
            None => {
                return ManifestAction {
                    when: None,
                    kind: ActionKind::Invalid(raw),
                }
            }
        };

        let when = object.get("when").cloned().map(MatchNode::from);

        let kind = if let Some(v) = object.get("excludeForChannels") {
            decode_names(v).map(|channels| ActionKind::Exclude { channels })
        } else if let Some(v) = object.get("route") {
            decode_targets(v).map(ActionKind::Route)
        } else if let Some(v) = object.get("optOutIncludeEvents") {
            decode_names(v).map(ActionKind::OptOutIncludeEvents)
        } else if let Some(v) = object.get("optOutExcludeEvents") {
            decode_names(v).map(ActionKind::OptOutExcludeEvents)
        } else if let Some(v) = object.get("optOutIncludeProperties") {
            decode_names(v).map(ActionKind::OptOutIncludeProperties)
        } else if let Some(v) = object.get("optOutExcludeProperties") {
            decode_names(v).map(ActionKind::OptOutExcludeProperties)
        } else if let Some(v) = object.get("throttle") {
            v.as_bool().map(ActionKind::Throttle)
        } else if let Some(v) = object.get("doNotThrottle") {
            v.as_bool().map(ActionKind::DoNotThrottle)
        } else if let Some(v) = object.get("piiProperties") {
            decode_names(v).map(ActionKind::Pii)
        } else {
            None
        };

        match kind {
            Some(kind) => ManifestAction { when, kind },
            None => ManifestAction {
                when,
                kind: ActionKind::Invalid(raw),
            },
        }
    }
}

impl ManifestAction {
    pub fn new(kind: ActionKind) -> Self {
        ManifestAction { when: None, kind }
    }

    pub fn when(mut self, predicate: MatchNode) -> Self {
        self.when = Some(predicate);
        self
    }

    /// True when the action has no predicate or its predicate matches.
    pub fn applies_to(&self, event: &crate::event::TelemetryEvent) -> bool {
        self.when.as_ref().map_or(true, |node| node.is_match(event))
    }
}

fn require_names(key: &str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(TelemetryError::validation(format!("empty {}", key)));
    }
    if names.iter().any(|n| n.is_empty()) {
        return Err(TelemetryError::validation(format!("empty name in {}", key)));
    }
    Ok(())
}

impl Validatable for ManifestAction {
    fn validate_self(&self) -> Result<()> {
        let key = self.kind.key();
        match &self.kind {
            ActionKind::Exclude { channels } => {
                if channels.iter().any(|c| c.is_empty()) {
                    return Err(TelemetryError::validation(
                        "empty channel id in excludeForChannels",
                    ));
                }
                Ok(())
            }
            ActionKind::OptOutIncludeEvents(names)
            | ActionKind::OptOutExcludeEvents(names)
            | ActionKind::OptOutIncludeProperties(names)
            | ActionKind::OptOutExcludeProperties(names)
            | ActionKind::Pii(names) => require_names(key, names),
            ActionKind::Throttle(flag) | ActionKind::DoNotThrottle(flag) => {
                if *flag {
                    Ok(())
                } else {
                    Err(TelemetryError::validation(format!("{} must be true", key)))
                }
            }
            ActionKind::Route(targets) if targets.is_empty() => {
                Err(TelemetryError::validation("empty route"))
            }
            ActionKind::Route(_) => Ok(()),
            ActionKind::Invalid(raw) => Err(TelemetryError::validation(format!(
                "unrecognized action {}",
                raw
            ))),
        }
    }

    fn children(&self) -> Vec<&dyn Validatable> {
        let mut children: Vec<&dyn Validatable> = Vec::new();
        if let Some(when) = &self.when {
            children.push(when);
        }
        if let ActionKind::Route(targets) = &self.kind {
            children.extend(targets.iter().map(|t| t as &dyn Validatable));
        }
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::validate_tree;
    use serde_json::json;

    fn decode(value: Value) -> ManifestAction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_presence_keyed_decoding() {
        assert_eq!(
            decode(json!({"excludeForChannels": ["ai"]})).kind,
            ActionKind::Exclude {
                channels: vec!["ai".into()]
            }
        );
        assert_eq!(
            decode(json!({"optOutExcludeProperties": ["UserPath"]})).kind,
            ActionKind::OptOutExcludeProperties(vec!["UserPath".into()])
        );
        assert_eq!(decode(json!({"throttle": true})).kind, ActionKind::Throttle(true));
        assert_eq!(
            decode(json!({"doNotThrottle": true})).kind,
            ActionKind::DoNotThrottle(true)
        );
        assert_eq!(
            decode(json!({"piiProperties": ["User.Name"]})).kind,
            ActionKind::Pii(vec!["User.Name".into()])
        );
        assert!(matches!(
            decode(json!({"route": [{"channelId": "sqm", "args": {"datapointId": 1}}]})).kind,
            ActionKind::Route(ref targets) if targets.len() == 1
        ));
    }

    #[test]
    fn test_when_predicate_is_decoded() {
        let action = decode(json!({
            "when": {"property": "VS.Core.SKU", "value": {"eq": "Pro"}},
            "throttle": true
        }));
        assert!(matches!(action.when, Some(MatchNode::Property { .. })));
    }

    #[test]
    fn test_unknown_action_decodes_to_invalid() {
        let action = decode(json!({"sample": 0.5}));
        assert!(matches!(action.kind, ActionKind::Invalid(_)));
        let err = validate_tree(&action).unwrap_err();
        assert!(err.to_string().contains("unrecognized action"));

        assert!(matches!(decode(json!(42)).kind, ActionKind::Invalid(_)));
        assert!(matches!(
            decode(json!({"piiProperties": "User.Name"})).kind,
            ActionKind::Invalid(_)
        ));
    }

    #[test]
    fn test_payload_validation() {
        assert!(validate_tree(&decode(json!({"optOutIncludeEvents": []}))).is_err());
        assert!(validate_tree(&decode(json!({"piiProperties": [""]}))).is_err());
        assert!(validate_tree(&decode(json!({"throttle": false}))).is_err());
        assert!(validate_tree(&decode(json!({"route": []}))).is_err());
        assert!(validate_tree(&decode(json!({"excludeForChannels": []}))).is_ok());
    }

    #[test]
    fn test_invalid_predicate_invalidates_owning_action() {
        let action = decode(json!({
            "when": {"and": []},
            "excludeForChannels": ["*"]
        }));
        let err = validate_tree(&action).unwrap_err();
        assert!(err.to_string().contains("empty and-clause"));
    }
}
