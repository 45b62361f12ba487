//! Typed property values and the case-insensitive, insertion-ordered bag
//! that holds them.

use crate::error::{Result, TelemetryError};
use serde::ser::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashSet;

/// Rendering used when an unconverted PII value reaches a serializer.
pub const REDACTED: &str = "[REDACTED]";

/// Folds a name or value for ordinal case-insensitive comparison.
pub fn fold_case(s: &str) -> Cow<'_, str> {
    if s.is_ascii() {
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(s.to_ascii_lowercase())
        } else {
            Cow::Borrowed(s)
        }
    } else {
        Cow::Owned(s.to_lowercase())
    }
}

/// Ordinal case-insensitive equality.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        a.eq_ignore_ascii_case(b)
    } else {
        fold_case(a) == fold_case(b)
    }
}

// ================================================================================================
// PROPERTY VALUES
// ================================================================================================

/// A value marked as personally identifiable. Hashed before transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PiiValue(Box<PropertyValue>);

impl PiiValue {
    pub fn new(value: impl Into<PropertyValue>) -> Self {
        PiiValue(Box::new(value.into()))
    }

    /// The raw, unhashed value.
    pub fn raw(&self) -> &PropertyValue {
        &self.0
    }
}

/// A structured value, rendered to JSON text by the complex-property stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexValue(serde_json::Value);

impl ComplexValue {
    pub fn json(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
    Pii(PiiValue),
    Complex(ComplexValue),
}

impl PropertyValue {
    /// Wraps a value to mark it as personally identifiable.
    pub fn pii(value: impl Into<PropertyValue>) -> Self {
        PropertyValue::Pii(PiiValue::new(value))
    }

    /// Converts any serializable object into a complex property value.
    ///
    /// Fails with `TelemetryError::Serialization` so that call sites can drop
    /// the offending property and keep posting.
    pub fn complex<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(|json| PropertyValue::Complex(ComplexValue(json)))
            .map_err(|source| TelemetryError::Serialization { source })
    }

    /// Text form used by string comparisons in match expressions.
    pub fn match_text(&self) -> Cow<'_, str> {
        match self {
            PropertyValue::String(s) => Cow::Borrowed(s.as_str()),
            PropertyValue::Number(n) => Cow::Owned(format_number(*n)),
            PropertyValue::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            PropertyValue::Pii(pii) => pii.raw().match_text(),
            PropertyValue::Complex(c) => Cow::Owned(c.json().to_string()),
        }
    }

    /// Numeric coercion used by `lt`/`gt`. `None` for non-numeric values.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) if !n.is_nan() => Some(*n),
            PropertyValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            PropertyValue::Pii(pii) => pii.raw().as_number(),
            _ => None,
        }
    }

    /// Invariant-culture string form, the input of PII hashing.
    pub fn to_invariant_string(&self) -> Result<String> {
        match self {
            PropertyValue::String(s) => Ok(s.clone()),
            PropertyValue::Number(n) if n.is_finite() => Ok(format_number(*n)),
            PropertyValue::Number(n) => Err(TelemetryError::PiiConversion(format!(
                "non-finite number {}",
                n
            ))),
            PropertyValue::Bool(b) => Ok(b.to_string()),
            PropertyValue::Pii(pii) => pii.raw().to_invariant_string(),
            PropertyValue::Complex(_) => Err(TelemetryError::PiiConversion(
                "complex values have no invariant string form".to_string(),
            )),
        }
    }

    /// True for the empty string; used by empty-property suppression.
    pub fn is_empty_string(&self) -> bool {
        matches!(self, PropertyValue::String(s) if s.is_empty())
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PropertyValue::String(s) => serializer.serialize_str(s),
            PropertyValue::Number(n) => serializer.serialize_f64(*n),
            PropertyValue::Bool(b) => serializer.serialize_bool(*b),
            PropertyValue::Pii(_) => serializer.serialize_str(REDACTED),
            PropertyValue::Complex(c) => c.json().serialize(serializer),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<PiiValue> for PropertyValue {
    fn from(value: PiiValue) -> Self {
        PropertyValue::Pii(value)
    }
}

// ================================================================================================
// PROPERTY BAG
// ================================================================================================

/// Insertion-ordered map from case-insensitive name to value.
///
/// Keys are unique under case folding; a second insert of the same name
/// replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| eq_ignore_case(key, name))
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.position(name).map(|idx| &self.entries[idx].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        match self.position(name) {
            Some(idx) => Some(&mut self.entries[idx].1),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Inserts or replaces a value. Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => {
                let (_, previous) = std::mem::replace(&mut self.entries[idx], (name, value));
                Some(previous)
            }
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<(String, PropertyValue)> {
        self.position(name).map(|idx| self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut PropertyValue)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Property names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &PropertyValue) -> bool,
    {
        self.entries.retain(|(k, v)| f(k, v));
    }
}

/// Case-insensitive set of property or event names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    folded: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) -> bool {
        self.folded.insert(fold_case(name).into_owned())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.folded.remove(&*fold_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.folded.contains(&*fold_case(name))
    }

    pub fn len(&self) -> usize {
        self.folded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }

    pub fn clear(&mut self) {
        self.folded.clear();
    }

    /// Case-folded members in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.folded.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for NameSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = NameSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_lookup_is_case_insensitive() {
        let mut bag = PropertyBag::new();
        bag.insert("VS.Core.SKU", "Pro".into());
        assert_eq!(bag.get("vs.core.sku"), Some(&PropertyValue::from("Pro")));
        assert!(bag.contains("VS.CORE.SKU"));
    }

    #[test]
    fn test_bag_last_write_wins_keeps_position() {
        let mut bag = PropertyBag::new();
        bag.insert("a", 1.into());
        bag.insert("b", 2.into());
        let previous = bag.insert("A", 3.into());

        assert_eq!(previous, Some(PropertyValue::Number(1.0)));
        assert_eq!(bag.len(), 2);
        let names: Vec<&str> = bag.names().collect();
        assert_eq!(names, vec!["A", "b"]);
        assert_eq!(bag.get("a"), Some(&PropertyValue::Number(3.0)));
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(PropertyValue::from("42").as_number(), Some(42.0));
        assert_eq!(PropertyValue::from(" 1.5 ").as_number(), Some(1.5));
        assert_eq!(PropertyValue::from("abc").as_number(), None);
        assert_eq!(PropertyValue::from(true).as_number(), None);
        assert_eq!(PropertyValue::pii(7).as_number(), Some(7.0));
    }

    #[test]
    fn test_invariant_string_forms() {
        assert_eq!(PropertyValue::from(42).to_invariant_string().unwrap(), "42");
        assert_eq!(PropertyValue::from(0.25).to_invariant_string().unwrap(), "0.25");
        assert_eq!(PropertyValue::from(false).to_invariant_string().unwrap(), "false");
        assert!(matches!(
            PropertyValue::Number(f64::NAN).to_invariant_string(),
            Err(TelemetryError::PiiConversion(_))
        ));

        let complex = PropertyValue::complex(&vec![1, 2]).unwrap();
        assert!(complex.to_invariant_string().is_err());
    }

    #[test]
    fn test_pii_serializes_redacted() {
        let json = serde_json::to_string(&PropertyValue::pii("secret")).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_name_set_folds_case() {
        let set: NameSet = ["UserPath", "Other"].into_iter().collect();
        assert!(set.contains("userpath"));
        assert!(set.contains("OTHER"));
        assert!(!set.contains("missing"));
    }

    #[test]
    fn test_non_ascii_case_folding() {
        assert!(eq_ignore_case("ÄBC", "äbc"));
        assert!(!eq_ignore_case("abc", "abd"));
    }
}
