//! Property tests for match evaluation and forward-compatible loading.

use proptest::prelude::*;
use serde_json::{json, Value};
use telemetry::manifest::Manifest;
use telemetry::matching::{validate_tree, MatchNode, MatchValue};
use telemetry::{PropertyValue, TelemetryEvent};

const NAMES: &[&str] = &["property", "value", "eq", "A.B"];

const KEYS: &[&str] = &[
    "and", "or", "not", "property", "value", "eq", "lt", "gt", "exists", "startsWith",
    "endsWith", "contains", "other",
];

/// JSON values biased toward the match grammar's keys so that generated
/// trees mix valid, malformed and unknown nodes.
fn match_like_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|n| json!(n)),
        "[a-zA-Z0-9. ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(5, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map(prop::sample::select(KEYS), inner, 0..4).prop_map(|m| {
                Value::Object(m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
            }),
        ]
    })
}

fn arbitrary_event() -> impl Strategy<Value = TelemetryEvent> {
    let value = prop_oneof![
        "[a-zA-Z0-9. ]{0,12}".prop_map(PropertyValue::String),
        any::<f64>().prop_map(PropertyValue::Number),
        any::<bool>().prop_map(PropertyValue::Bool),
        "[a-z]{0,8}".prop_map(|s| PropertyValue::pii(s)),
    ];
    prop::collection::vec((prop::sample::select(NAMES), value), 0..6)
        .prop_map(|props| {
            let mut event = TelemetryEvent::new("Op/Fuzz").unwrap();
            for (name, value) in props {
                event.set_property(name, value).unwrap();
            }
            event
        })
}

proptest! {
    /// Evaluation is total: any decoded tree yields a boolean for any event.
    #[test]
    fn match_evaluation_is_total(raw in match_like_json(), event in arbitrary_event()) {
        let node = MatchNode::from(raw);
        let _ = node.is_match(&event);
        let _ = validate_tree(&node);
    }

    /// Loading never fails for well-formed JSON; every rule is either kept
    /// or recorded as dropped.
    #[test]
    fn every_rule_is_kept_or_dropped(rules in prop::collection::vec(match_like_json(), 0..8)) {
        let count = rules.len();
        let text = json!({ "actions": rules }).to_string();
        let manifest = Manifest::parse(&text).unwrap();
        prop_assert_eq!(manifest.actions().len() + manifest.invalid_rules().len(), count);
    }

    #[test]
    fn eq_ignores_case(text in "[a-zA-Z]{1,12}") {
        let matcher = MatchValue::Eq(text.to_uppercase());
        prop_assert!(matcher.is_match(Some(&PropertyValue::String(text.to_lowercase()))));
    }

    #[test]
    fn numeric_bounds_never_match_text(text in "[a-zA-Z]{1,12}", bound in -1.0e9f64..1.0e9) {
        let value = PropertyValue::String(text);
        prop_assert!(!MatchValue::Gt(bound).is_match(Some(&value)));
        prop_assert!(!MatchValue::Lt(bound).is_match(Some(&value)));
    }
}

#[test]
fn empty_event_matches_nothing_but_negations() {
    let event = TelemetryEvent::new("Op/Empty").unwrap();
    let exists = MatchNode::property("Anything", MatchValue::Exists(true));
    assert!(!exists.is_match(&event));
    assert!(MatchNode::Not(Box::new(exists)).is_match(&event));
}
