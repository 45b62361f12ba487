//! Pipeline stages supplied by the host rather than by the manifest.

use super::action::EventAction;
use super::context::{OptOutVerdict, ProcessorContext};
use super::priority::ActionPriority;
use crate::event::{is_reserved_property_name, TelemetryEvent};
use crate::pii::{is_not_hashed_property, PiiProcessor};
use crate::property::{fold_case, PropertyValue};
use crate::types::{EventKind, ThrottlingDecision};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const METRIC_NAME_PROPERTY: &str = "Reserved.Metric.Name";
pub const METRIC_VALUE_PROPERTY: &str = "Reserved.Metric.Value";

/// The host stages every processor runs, sorted by priority.
pub fn standard_stages() -> Vec<Arc<dyn EventAction>> {
    vec![
        Arc::new(CustomOptOutAction),
        Arc::new(MetricAction),
        Arc::new(SettingAction::default()),
        Arc::new(PiiAction::default()),
        Arc::new(AiRestrictionAction),
        Arc::new(ComplexPropertyAction),
        Arc::new(SuppressEmptyPropertyAction),
        Arc::new(GeneralThrottlingAction::default()),
    ]
}

// ================================================================================================
// OPT-OUT
// ================================================================================================

/// First opt-out ruling for opted-out sessions. Friendly events keep only
/// their friendly and reserved properties; other events are denied and
/// left for the manifest opt-out stage to finalize.
pub struct CustomOptOutAction;

impl EventAction for CustomOptOutAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::CustomOptOut
    }

    fn name(&self) -> &'static str {
        "custom-opt-out"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        if !ctx.session().is_opted_out() {
            return true;
        }
        if !event.is_opt_out_friendly() {
            ctx.set_opt_out(OptOutVerdict::Denied);
            return true;
        }

        ctx.set_opt_out(OptOutVerdict::Allowed);
        let unfriendly: Vec<String> = event
            .properties()
            .names()
            .filter(|name| {
                !event.is_opt_out_friendly_property(name) && !is_reserved_property_name(name)
            })
            .map(str::to_string)
            .collect();
        for name in unfriendly {
            event.exclude_property(&name);
        }
        true
    }
}

// ================================================================================================
// METRIC / SETTING
// ================================================================================================

/// Stamps metric name and value; metric events without a finite value are
/// dropped.
pub struct MetricAction;

impl EventAction for MetricAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::Metric
    }

    fn name(&self) -> &'static str {
        "metric"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        if event.kind() != EventKind::Metric {
            return true;
        }
        let metric = match event.metric_data() {
            Some(metric) if metric.value.is_finite() => metric.clone(),
            _ => {
                debug!("Dropping metric event {} without a finite value", event.name());
                ctx.mark_dropped();
                return false;
            }
        };
        let bag = event.properties_mut();
        bag.insert(METRIC_NAME_PROPERTY, PropertyValue::String(metric.name));
        bag.insert(METRIC_VALUE_PROPERTY, PropertyValue::Number(metric.value));
        true
    }
}

/// Default number of setting fingerprints remembered per processor.
pub const DEFAULT_SETTING_CAPACITY: usize = 1024;

/// Recently posted setting fingerprints, least recently seen evicted first.
struct SeenSettings {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, u64>,
    evictions: u64,
}

impl SeenSettings {
    /// Records a fingerprint. Returns true if it was not already present.
    fn observe(&mut self, key: String) -> bool {
        self.tick += 1;
        if let Some(last_seen) = self.entries.get_mut(&key) {
            *last_seen = self.tick;
            return false;
        }
        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, tick)| **tick)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
                self.evictions += 1;
            }
        }
        self.entries.insert(key, self.tick);
        true
    }
}

/// Posts each distinct setting value once per session.
///
/// Fingerprints are kept in a bounded table; a value evicted from it is
/// posted again the next time it is seen.
pub struct SettingAction {
    seen: Mutex<SeenSettings>,
}

impl Default for SettingAction {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SETTING_CAPACITY)
    }
}

impl SettingAction {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(SeenSettings {
                capacity: capacity.max(1),
                tick: 0,
                entries: HashMap::new(),
                evictions: 0,
            }),
        }
    }

    /// Number of fingerprints currently remembered.
    pub fn len(&self) -> usize {
        self.seen.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.seen.lock().evictions
    }

    fn fingerprint(event: &TelemetryEvent) -> String {
        let mut key = fold_case(event.name()).into_owned();
        for (name, value) in event.transmitted_properties() {
            if is_reserved_property_name(name) {
                continue;
            }
            key.push('|');
            key.push_str(&fold_case(name));
            key.push('=');
            key.push_str(&value.match_text());
        }
        key
    }
}

impl EventAction for SettingAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::Setting
    }

    fn name(&self) -> &'static str {
        "setting"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        if event.kind() != EventKind::Setting {
            return true;
        }
        if self.seen.lock().observe(Self::fingerprint(event)) {
            return true;
        }
        debug!("Dropping repeated setting event {}", event.name());
        ctx.mark_dropped();
        false
    }
}

// ================================================================================================
// PII / RESTRICTED CHANNELS
// ================================================================================================

/// Hashes PII values, attaching raw values when the session allows it.
#[derive(Default)]
pub struct PiiAction {
    processor: PiiProcessor,
}

impl EventAction for PiiAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::Pii
    }

    fn name(&self) -> &'static str {
        "pii"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        self.processor.process(event, ctx.session());
        true
    }
}

/// Keeps unhashed PII and complex payloads away from restricted channels.
pub struct AiRestrictionAction;

impl EventAction for AiRestrictionAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::AiRestrictionEnforcement
    }

    fn name(&self) -> &'static str {
        "ai-restriction"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        let sensitive = event.transmitted_properties().any(|(name, value)| {
            is_not_hashed_property(name) || matches!(value, PropertyValue::Complex(_))
        });
        if sensitive {
            let restricted = ctx.router().restricted_channel_ids();
            for channel_id in restricted {
                ctx.exclude_channel(&channel_id);
            }
        }
        true
    }
}

// ================================================================================================
// PAYLOAD SHAPING
// ================================================================================================

/// Renders complex values as compact JSON text.
pub struct ComplexPropertyAction;

impl EventAction for ComplexPropertyAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ComplexProperty
    }

    fn name(&self) -> &'static str {
        "complex-property"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        for (_, value) in event.properties_mut().iter_mut() {
            let text = match value {
                PropertyValue::Complex(complex) => complex.json().to_string(),
                _ => continue,
            };
            *value = PropertyValue::String(text);
        }
        true
    }
}

/// Excludes empty-string properties outside the reserved prefixes.
pub struct SuppressEmptyPropertyAction;

impl EventAction for SuppressEmptyPropertyAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::SuppressEmptyPostProperty
    }

    fn name(&self) -> &'static str {
        "suppress-empty-property"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        let empty: Vec<String> = event
            .transmitted_properties()
            .filter(|(name, value)| value.is_empty_string() && !is_reserved_property_name(name))
            .map(|(name, _)| name.to_string())
            .collect();
        for name in empty {
            event.exclude_property(&name);
        }
        true
    }
}

// ================================================================================================
// GENERAL THROTTLING
// ================================================================================================

struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window rate limit using the manifest's throttling settings.
/// Events marked `DoNotThrottle` are neither counted nor limited.
pub struct GeneralThrottlingAction {
    window: Mutex<Window>,
}

impl Default for GeneralThrottlingAction {
    fn default() -> Self {
        Self {
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }
}

impl EventAction for GeneralThrottlingAction {
    fn priority(&self) -> ActionPriority {
        ActionPriority::GeneralThrottling
    }

    fn name(&self) -> &'static str {
        "general-throttling"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        if ctx.throttling() == ThrottlingDecision::DoNotThrottle {
            return true;
        }

        let settings = ctx.manifest().throttling();
        let (threshold, length) = (settings.threshold, settings.window);
        let over = {
            let mut window = self.window.lock();
            if window.started.elapsed() >= length {
                window.started = Instant::now();
                window.count = 0;
            }
            window.count += 1;
            window.count > threshold
        };

        if over {
            debug!("Throttling event {}", event.name());
            ctx.mark_throttled();
            return false;
        }
        true
    }
}
