//! Wire form of a manifest and its one-shot validation pass.

use super::action::ManifestAction;
use super::{DroppedRule, Manifest, ThrottlingSettings};
use crate::error::{Result, TelemetryError};
use crate::matching::validate_tree;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Manifest document as decoded from JSON, before validation.
///
/// Unknown top-level fields are ignored; unknown action and match shapes
/// decode to `Invalid` variants and are dropped by [`ManifestDocument::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub throttling_threshold: Option<u64>,
    #[serde(default)]
    pub throttling_window_secs: Option<u64>,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

impl ManifestDocument {
    /// Decodes document text. Only malformed JSON (or a top-level shape
    /// that is not a manifest object) is an error.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|source| TelemetryError::ManifestParse { source })
    }

    /// Version rendered as text; numeric versions are accepted.
    fn version_text(&self) -> Option<String> {
        match &self.version {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }

    fn throttling(&self) -> ThrottlingSettings {
        let defaults = ThrottlingSettings::default();
        ThrottlingSettings {
            threshold: self
                .throttling_threshold
                .filter(|t| *t > 0)
                .unwrap_or(defaults.threshold),
            window: self
                .throttling_window_secs
                .filter(|w| *w > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.window),
        }
    }

    /// Validates every action tree once, keeping the valid ones in document
    /// order and recording the rest as dropped rules.
    ///
    /// Never fails: a manifest whose every rule is invalid still loads with
    /// no actions.
    pub fn validate(self) -> Manifest {
        let version = self.version_text();
        let throttling = self.throttling();
        let etag = self.etag;

        let mut actions = Vec::with_capacity(self.actions.len());
        let mut invalid_rules = Vec::new();

        for (index, action) in self.actions.into_iter().enumerate() {
            match validate_tree(&action) {
                Ok(()) => actions.push(action),
                Err(e) => {
                    warn!(
                        "Dropping manifest rule #{} ({}): {}",
                        index, action.kind, e
                    );
                    invalid_rules.push(DroppedRule {
                        index,
                        kind: action.kind.key().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Manifest {:?} validated: {} rules kept, {} dropped",
            version,
            actions.len(),
            invalid_rules.len()
        );

        Manifest::assemble(version, etag, throttling, actions, invalid_rules)
    }
}
