//! Registration-time channel eligibility checks.

use super::ChannelProperties;
use crate::property::fold_case;
use crate::session::TelemetrySession;
use std::collections::HashMap;
use std::sync::Arc;

/// A channel as seen by validators. Validators may adjust its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRegistration {
    pub id: String,
    pub properties: ChannelProperties,
}

/// One independent eligibility check.
pub trait ChannelValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_valid(&self, registration: &mut ChannelRegistration) -> bool;
}

/// Vetoes every channel while telemetry is globally disabled.
pub struct GlobalSwitchValidator {
    disabled: bool,
}

impl GlobalSwitchValidator {
    pub fn new(disabled: bool) -> Self {
        Self { disabled }
    }
}

impl ChannelValidator for GlobalSwitchValidator {
    fn name(&self) -> &'static str {
        "global-switch"
    }

    fn is_valid(&self, _registration: &mut ChannelRegistration) -> bool {
        !self.disabled
    }
}

/// Internal-only channels require an internal user.
pub struct InternalChannelValidator {
    session: Arc<TelemetrySession>,
}

impl InternalChannelValidator {
    pub fn new(session: Arc<TelemetrySession>) -> Self {
        Self { session }
    }
}

impl ChannelValidator for InternalChannelValidator {
    fn name(&self) -> &'static str {
        "internal-channel"
    }

    fn is_valid(&self, registration: &mut ChannelRegistration) -> bool {
        !registration.properties.internal_only || self.session.is_internal_user()
    }
}

/// Per-channel force enable/disable switches keyed by channel id.
///
/// Force-enabling a channel also makes it a default channel.
pub struct OverrideValidator {
    overrides: HashMap<String, bool>,
}

impl OverrideValidator {
    pub fn new(overrides: &HashMap<String, bool>) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|(id, enabled)| (fold_case(id).into_owned(), *enabled))
                .collect(),
        }
    }
}

impl ChannelValidator for OverrideValidator {
    fn name(&self) -> &'static str {
        "override"
    }

    fn is_valid(&self, registration: &mut ChannelRegistration) -> bool {
        match self.overrides.get(&*fold_case(&registration.id)) {
            Some(true) => {
                registration.properties.is_default = true;
                true
            }
            Some(false) => false,
            None => true,
        }
    }
}

/// Logical AND over independent validators.
pub struct ValidatorChain {
    validators: Vec<Box<dyn ChannelValidator>>,
}

impl ValidatorChain {
    pub fn new(validators: Vec<Box<dyn ChannelValidator>>) -> Self {
        Self { validators }
    }

    /// Global switch, internal-only check and overrides.
    pub fn standard(
        disabled: bool,
        session: Arc<TelemetrySession>,
        overrides: &HashMap<String, bool>,
    ) -> Self {
        Self::new(vec![
            Box::new(GlobalSwitchValidator::new(disabled)),
            Box::new(InternalChannelValidator::new(session)),
            Box::new(OverrideValidator::new(overrides)),
        ])
    }

    /// Accepts every channel.
    pub fn permissive() -> Self {
        Self::new(Vec::new())
    }

    /// Returns the first validator that rejects the channel, if any.
    pub fn rejected_by(&self, registration: &mut ChannelRegistration) -> Option<&'static str> {
        self.validators
            .iter()
            .find(|v| !v.is_valid(registration))
            .map(|v| v.name())
    }

    pub fn is_valid(&self, registration: &mut ChannelRegistration) -> bool {
        self.rejected_by(registration).is_none()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
