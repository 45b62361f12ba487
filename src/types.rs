//! Shared primitive types used across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Event severity, carried as immutable event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Normal => write!(f, "normal"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// What kind of data point an event represents.
///
/// Metric and setting events get dedicated host stages in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Trace,
    Operation,
    Fault,
    Metric,
    Setting,
}

/// Metric payload attached to `EventKind::Metric` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
}

/// Tri-state throttling outcome stored per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottlingDecision {
    #[default]
    Unset,
    Throttle,
    DoNotThrottle,
}
