//! Fixed execution priorities of pipeline stages.
//!
//! Manifests are authored against this order. Do not renumber or reorder.

use std::fmt;

/// Priority of a pipeline stage. Lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionPriority {
    ManifestExclude,
    CustomOptOut,
    ManifestOptOut,
    ManifestThrottling,
    ManifestPii,
    Metric,
    Setting,
    Pii,
    AiRestrictionEnforcement,
    ComplexProperty,
    SuppressEmptyPostProperty,
    GeneralThrottling,
    ManifestRoute,
}

impl ActionPriority {
    /// All priorities in execution order.
    pub const ALL: [ActionPriority; 13] = [
        ActionPriority::ManifestExclude,
        ActionPriority::CustomOptOut,
        ActionPriority::ManifestOptOut,
        ActionPriority::ManifestThrottling,
        ActionPriority::ManifestPii,
        ActionPriority::Metric,
        ActionPriority::Setting,
        ActionPriority::Pii,
        ActionPriority::AiRestrictionEnforcement,
        ActionPriority::ComplexProperty,
        ActionPriority::SuppressEmptyPostProperty,
        ActionPriority::GeneralThrottling,
        ActionPriority::ManifestRoute,
    ];

    pub const fn value(self) -> u32 {
        match self {
            ActionPriority::ManifestExclude => 0,
            ActionPriority::CustomOptOut => 1,
            ActionPriority::ManifestOptOut => 2,
            ActionPriority::ManifestThrottling => 3,
            ActionPriority::ManifestPii => 4,
            ActionPriority::Metric => 50,
            ActionPriority::Setting => 60,
            ActionPriority::Pii => 100,
            ActionPriority::AiRestrictionEnforcement => 200,
            ActionPriority::ComplexProperty => 250,
            ActionPriority::SuppressEmptyPostProperty => 300,
            ActionPriority::GeneralThrottling => 1000,
            ActionPriority::ManifestRoute => 10000,
        }
    }
}

impl PartialOrd for ActionPriority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActionPriority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

impl fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.value())
    }
}
