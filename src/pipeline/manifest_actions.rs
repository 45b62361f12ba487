//! Pipeline stages compiled from the validated actions of a manifest.
//!
//! Actions of one kind are folded into a single stage that keeps the rules
//! in document order, so the stage list of a snapshot has at most one entry
//! per manifest priority.

use super::action::EventAction;
use super::context::{OptOutVerdict, ProcessorContext};
use super::priority::ActionPriority;
use crate::event::TelemetryEvent;
use crate::manifest::{ActionKind, ManifestAction, RouteTarget, ALL_CHANNELS};
use crate::matching::MatchNode;
use crate::property::{NameSet, PropertyValue};
use crate::types::ThrottlingDecision;
use log::debug;
use std::sync::Arc;

/// A payload guarded by an optional predicate.
struct Rule<T> {
    when: Option<MatchNode>,
    payload: T,
}

impl<T> Rule<T> {
    fn new(action: &ManifestAction, payload: T) -> Self {
        Self {
            when: action.when.clone(),
            payload,
        }
    }

    fn applies(&self, event: &TelemetryEvent) -> bool {
        self.when.as_ref().map_or(true, |node| node.is_match(event))
    }
}

/// Folds validated actions into stages sorted by ascending priority.
///
/// The opt-out stage is always present: it finalizes the verdict of the
/// host's custom opt-out stage even when the manifest has no opt-out rules.
pub fn compile(actions: &[ManifestAction]) -> Vec<Arc<dyn EventAction>> {
    let mut exclude = ExcludeStage::default();
    let mut opt_out = OptOutStage::default();
    let mut throttle = ThrottleStage::default();
    let mut pii = ManifestPiiStage::default();
    let mut route = RouteStage::default();

    for action in actions {
        match &action.kind {
            ActionKind::Exclude { channels } => {
                exclude.rules.push(Rule::new(action, channels.clone()))
            }
            ActionKind::OptOutIncludeEvents(names) => opt_out
                .include_events
                .push(Rule::new(action, names.iter().map(String::as_str).collect())),
            ActionKind::OptOutExcludeEvents(names) => opt_out
                .exclude_events
                .push(Rule::new(action, names.iter().map(String::as_str).collect())),
            ActionKind::OptOutIncludeProperties(names) => {
                opt_out.include_properties.push(Rule::new(action, names.clone()))
            }
            ActionKind::OptOutExcludeProperties(names) => {
                opt_out.exclude_properties.push(Rule::new(action, names.clone()))
            }
            ActionKind::Throttle(_) => throttle
                .rules
                .push(Rule::new(action, ThrottlingDecision::Throttle)),
            ActionKind::DoNotThrottle(_) => throttle
                .rules
                .push(Rule::new(action, ThrottlingDecision::DoNotThrottle)),
            ActionKind::Pii(names) => pii.rules.push(Rule::new(action, names.clone())),
            ActionKind::Route(targets) => route.rules.push(Rule::new(action, targets.clone())),
            // Dropped during validation; never compiled.
            ActionKind::Invalid(_) => {}
        }
    }

    let mut stages: Vec<Arc<dyn EventAction>> = vec![Arc::new(opt_out)];
    if !exclude.rules.is_empty() {
        stages.push(Arc::new(exclude));
    }
    if !throttle.rules.is_empty() {
        stages.push(Arc::new(throttle));
    }
    if !pii.rules.is_empty() {
        stages.push(Arc::new(pii));
    }
    if !route.rules.is_empty() {
        stages.push(Arc::new(route));
    }
    stages.sort_by_key(|stage| stage.priority());
    stages
}

// ================================================================================================
// EXCLUDE
// ================================================================================================

#[derive(Default)]
struct ExcludeStage {
    rules: Vec<Rule<Vec<String>>>,
}

impl EventAction for ExcludeStage {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ManifestExclude
    }

    fn name(&self) -> &'static str {
        "manifest-exclude"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        for rule in self.rules.iter().filter(|r| r.applies(event)) {
            let everywhere =
                rule.payload.is_empty() || rule.payload.iter().any(|c| c == ALL_CHANNELS);
            if everywhere {
                debug!("Event {} excluded from all channels", event.name());
                ctx.mark_dropped();
                return false;
            }
            for channel in &rule.payload {
                ctx.exclude_channel(channel);
            }
        }
        true
    }
}

// ================================================================================================
// OPT-OUT
// ================================================================================================

#[derive(Default)]
struct OptOutStage {
    include_events: Vec<Rule<NameSet>>,
    exclude_events: Vec<Rule<NameSet>>,
    include_properties: Vec<Rule<Vec<String>>>,
    exclude_properties: Vec<Rule<Vec<String>>>,
}

impl EventAction for OptOutStage {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ManifestOptOut
    }

    fn name(&self) -> &'static str {
        "manifest-opt-out"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        if !ctx.session().is_opted_out() {
            return true;
        }

        for rule in &self.include_events {
            if rule.payload.contains(event.name()) && rule.applies(event) {
                ctx.set_opt_out(OptOutVerdict::Allowed);
            }
        }
        for rule in &self.exclude_events {
            if rule.payload.contains(event.name()) && rule.applies(event) {
                ctx.set_opt_out(OptOutVerdict::Denied);
            }
        }

        if ctx.opt_out() != OptOutVerdict::Allowed {
            debug!("Event {} denied for opted-out session", event.name());
            ctx.mark_dropped();
            return false;
        }

        for rule in &self.include_properties {
            if rule.applies(event) {
                for name in &rule.payload {
                    event.include_property(name);
                }
            }
        }
        for rule in &self.exclude_properties {
            if rule.applies(event) {
                for name in &rule.payload {
                    event.exclude_property(name);
                }
            }
        }
        true
    }
}

// ================================================================================================
// THROTTLING
// ================================================================================================

#[derive(Default)]
struct ThrottleStage {
    rules: Vec<Rule<ThrottlingDecision>>,
}

impl EventAction for ThrottleStage {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ManifestThrottling
    }

    fn name(&self) -> &'static str {
        "manifest-throttling"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        // Document order: the last matching rule wins.
        for rule in self.rules.iter().filter(|r| r.applies(event)) {
            ctx.set_throttling(rule.payload);
        }
        true
    }
}

// ================================================================================================
// PII MARKING
// ================================================================================================

#[derive(Default)]
struct ManifestPiiStage {
    rules: Vec<Rule<Vec<String>>>,
}

impl EventAction for ManifestPiiStage {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ManifestPii
    }

    fn name(&self) -> &'static str {
        "manifest-pii"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        let mut marked = Vec::new();
        for rule in self.rules.iter().filter(|r| r.applies(event)) {
            marked.extend(rule.payload.iter().cloned());
        }
        for name in marked {
            if let Some(value) = event.properties_mut().get_mut(&name) {
                if !matches!(value, PropertyValue::Pii(_)) {
                    let raw = std::mem::replace(value, PropertyValue::Bool(false));
                    *value = PropertyValue::pii(raw);
                }
            }
        }
        true
    }
}

// ================================================================================================
// ROUTE
// ================================================================================================

#[derive(Default)]
struct RouteStage {
    rules: Vec<Rule<Vec<RouteTarget>>>,
}

impl EventAction for RouteStage {
    fn priority(&self) -> ActionPriority {
        ActionPriority::ManifestRoute
    }

    fn name(&self) -> &'static str {
        "manifest-route"
    }

    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool {
        if ctx.is_dropped() {
            return false;
        }
        for rule in self.rules.iter().filter(|r| r.applies(event)) {
            for target in &rule.payload {
                ctx.add_route(&target.channel_id, target.argument.clone());
            }
        }
        true
    }
}
