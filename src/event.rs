//! Telemetry events: immutable identity plus a mutable property bag and the
//! set of properties currently excluded from transmission.

use crate::error::{Result, TelemetryError};
use crate::pii::not_hashed_name;
use crate::property::{fold_case, NameSet, PropertyBag, PropertyValue};
use crate::types::{now_ms, EventKind, Metric, Severity};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use uuid::Uuid;

fn event_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.\-]+(/[A-Za-z0-9_.\-]+)+$").expect("static event name pattern")
    })
}

fn property_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-/]+$").expect("static property name pattern"))
}

/// Checks an event name: two or more `/`-separated segments.
pub fn validate_event_name(name: &str) -> Result<()> {
    if event_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(TelemetryError::InvalidEventName(name.to_string()))
    }
}

/// Checks a property name against the allowed character set.
pub fn validate_property_name(name: &str) -> Result<()> {
    if property_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(TelemetryError::InvalidPropertyName(name.to_string()))
    }
}

/// Property-name prefixes owned by the framework. Properties under these
/// prefixes are never suppressed for being empty or filtered by opt-out.
pub const RESERVED_PREFIXES: [&str; 4] = ["Reserved.", "Context.", "DataModel.", "Correlation."];

pub fn is_reserved_property_name(name: &str) -> bool {
    let folded = fold_case(name);
    RESERVED_PREFIXES
        .iter()
        .any(|prefix| folded.starts_with(&*fold_case(prefix)))
}

/// A named event with typed properties.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    id: Uuid,
    name: String,
    timestamp_ms: u64,
    severity: Severity,
    kind: EventKind,
    metric: Option<Metric>,
    opt_out_friendly: bool,
    opt_out_friendly_properties: NameSet,
    properties: PropertyBag,
    excluded: NameSet,
}

impl TelemetryEvent {
    /// Creates an event, validating its name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_event_name(&name)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            timestamp_ms: now_ms(),
            severity: Severity::Normal,
            kind: EventKind::Trace,
            metric: None,
            opt_out_friendly: false,
            opt_out_friendly_properties: NameSet::new(),
            properties: PropertyBag::new(),
            excluded: NameSet::new(),
        })
    }

    /// Creates a metric event.
    pub fn metric(name: impl Into<String>, metric_name: impl Into<String>, value: f64) -> Result<Self> {
        let mut event = Self::new(name)?;
        event.kind = EventKind::Metric;
        event.metric = Some(Metric {
            name: metric_name.into(),
            value,
        });
        Ok(event)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Marks the event as allowed for opted-out sessions, keeping only the
    /// listed properties in that case.
    pub fn opt_out_friendly<'a>(mut self, properties: impl IntoIterator<Item = &'a str>) -> Self {
        self.opt_out_friendly = true;
        self.opt_out_friendly_properties = properties.into_iter().collect();
        self
    }

    pub fn with_property(mut self, name: &str, value: impl Into<PropertyValue>) -> Result<Self> {
        self.set_property(name, value)?;
        Ok(self)
    }

    /// Sets a property, validating its name. Last write wins.
    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        validate_property_name(name)?;
        self.properties.insert(name, value.into());
        Ok(())
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn metric_data(&self) -> Option<&Metric> {
        self.metric.as_ref()
    }

    pub fn is_opt_out_friendly(&self) -> bool {
        self.opt_out_friendly
    }

    pub fn is_opt_out_friendly_property(&self, name: &str) -> bool {
        self.opt_out_friendly_properties.contains(name)
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    /// Property value, if present and not excluded.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        if self.excluded.contains(name) {
            return None;
        }
        self.properties.get(name)
    }

    // ============================================================================================
    // EXCLUSION
    // ============================================================================================

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Moves a present property to the excluded state, together with its
    /// unhashed PII companion. Returns true if the property exists and was
    /// not already excluded.
    pub fn exclude_property(&mut self, name: &str) -> bool {
        if !self.properties.contains(name) {
            return false;
        }
        let companion = not_hashed_name(name);
        if self.properties.contains(&companion) {
            self.excluded.insert(&companion);
        }
        self.excluded.insert(name)
    }

    /// Reinstates a previously excluded property and its unhashed PII
    /// companion.
    pub fn include_property(&mut self, name: &str) -> bool {
        self.excluded.remove(&not_hashed_name(name));
        self.excluded.remove(name)
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Properties in transmission scope, in insertion order.
    pub fn transmitted_properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties
            .iter()
            .filter(move |(name, _)| !self.excluded.contains(name))
    }

    /// JSON rendering of what a channel transmits.
    pub fn to_transmitted_json(&self) -> Value {
        let mut properties = Map::new();
        for (name, value) in self.transmitted_properties() {
            properties.insert(
                name.to_string(),
                serde_json::to_value(value).unwrap_or(Value::Null),
            );
        }
        json!({
            "id": self.id.to_string(),
            "name": self.name,
            "timestamp": self.timestamp_ms,
            "severity": self.severity,
            "kind": self.kind,
            "properties": Value::Object(properties),
        })
    }
}

// ================================================================================================
// JSON INPUT
// ================================================================================================

/// Event as read from a JSON line by the agent and the manifest tool.
///
/// ```json
/// {"name": "Op/Build", "kind": "operation", "properties": {"VS.Core.SKU": "Pro"}, "pii": ["User.Email"]}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Names of properties to mark as PII.
    #[serde(default)]
    pub pii: Vec<String>,
    /// Present when the event is opt-out friendly; lists the properties
    /// kept for opted-out sessions.
    #[serde(default)]
    pub opt_out_friendly: Option<Vec<String>>,
}

impl EventInput {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| TelemetryError::Serialization { source })
    }

    /// Builds the event. Nulls are skipped; arrays and objects become
    /// complex values.
    pub fn into_event(self) -> Result<TelemetryEvent> {
        let mut event = match self.metric {
            Some(metric) => TelemetryEvent::metric(self.name, metric.name, metric.value)?,
            None => TelemetryEvent::new(self.name)?.with_kind(self.kind),
        }
        .with_severity(self.severity);

        if let Some(friendly) = &self.opt_out_friendly {
            event = event.opt_out_friendly(friendly.iter().map(String::as_str));
        }

        let pii: NameSet = self.pii.iter().map(String::as_str).collect();
        for (name, value) in self.properties {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => PropertyValue::String(s),
                Value::Bool(b) => PropertyValue::Bool(b),
                Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(f64::NAN)),
                complex => PropertyValue::complex(&complex)?,
            };
            let value = if pii.contains(&name) {
                PropertyValue::pii(value)
            } else {
                value
            };
            event.set_property(&name, value)?;
        }
        Ok(event)
    }
}
