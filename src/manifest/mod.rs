//! Manifest data model: rules authored centrally and evaluated against every
//! event.
//!
//! A [`Manifest`] is immutable once built. The manager publishes new
//! snapshots by swapping an `Arc<Manifest>`; in-flight events keep the
//! snapshot they started with.

pub mod action;
pub mod document;
pub mod route;

pub use action::{ActionKind, ManifestAction, ALL_CHANNELS};
pub use document::ManifestDocument;
pub use route::{RouteArgument, RouteTarget};

use crate::error::Result;
use crate::pipeline::action::EventAction;
use crate::pipeline::manifest_actions;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Manifest shipped with the library, used when no cached or remote
/// document is available.
pub const BUNDLED_MANIFEST: &str = r#"{
    "version": "bundled",
    "throttlingThreshold": 1000,
    "throttlingWindowSecs": 10,
    "actions": []
}"#;

/// Parameters of the general throttling stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlingSettings {
    /// Events allowed per window.
    pub threshold: u64,
    pub window: Duration,
}

impl Default for ThrottlingSettings {
    fn default() -> Self {
        Self {
            threshold: 1000,
            window: Duration::from_secs(10),
        }
    }
}

/// A rule removed during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRule {
    /// Position of the rule in the document's `actions` array.
    pub index: usize,
    /// Action key, or `invalid` for unrecognized shapes.
    pub kind: String,
    pub reason: String,
}

impl fmt::Display for DroppedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.index, self.kind, self.reason)
    }
}

/// A validated manifest snapshot.
pub struct Manifest {
    version: Option<String>,
    etag: Option<String>,
    throttling: ThrottlingSettings,
    actions: Vec<ManifestAction>,
    invalid_rules: Vec<DroppedRule>,
    stages: Vec<Arc<dyn EventAction>>,
}

impl Manifest {
    /// Parses and validates document text.
    ///
    /// # Returns
    /// - `Ok(Manifest)`: the document was well-formed; invalid rules were
    ///   dropped and recorded in [`Manifest::invalid_rules`]
    /// - `Err(TelemetryError::ManifestParse)`: malformed document
    ///
    /// # Example
    /// ```rust
    /// use telemetry::manifest::Manifest;
    ///
    /// let manifest = Manifest::parse(r#"{"actions": [{"throttle": true}, {"nope": 1}]}"#)?;
    /// assert_eq!(manifest.actions().len(), 1);
    /// assert_eq!(manifest.invalid_rules().len(), 1);
    /// # Ok::<(), telemetry::TelemetryError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        Ok(ManifestDocument::parse(text)?.validate())
    }

    /// Builds a manifest from already-constructed actions, validating them
    /// the same way a parsed document is validated.
    pub fn from_actions(actions: Vec<ManifestAction>) -> Self {
        ManifestDocument {
            actions,
            ..ManifestDocument::default()
        }
        .validate()
    }

    /// The empty manifest every service can fall back to.
    pub fn bundled_default() -> Self {
        Manifest::parse(BUNDLED_MANIFEST).unwrap_or_else(|_| Manifest::from_actions(Vec::new()))
    }

    pub(crate) fn assemble(
        version: Option<String>,
        etag: Option<String>,
        throttling: ThrottlingSettings,
        actions: Vec<ManifestAction>,
        invalid_rules: Vec<DroppedRule>,
    ) -> Self {
        let stages = manifest_actions::compile(&actions);
        Self {
            version,
            etag,
            throttling,
            actions,
            invalid_rules,
            stages,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn throttling(&self) -> &ThrottlingSettings {
        &self.throttling
    }

    /// Valid actions in document order.
    pub fn actions(&self) -> &[ManifestAction] {
        &self.actions
    }

    pub fn invalid_rules(&self) -> &[DroppedRule] {
        &self.invalid_rules
    }

    /// Compiled pipeline stages, sorted by ascending priority.
    pub fn stages(&self) -> &[Arc<dyn EventAction>] {
        &self.stages
    }
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("version", &self.version)
            .field("etag", &self.etag)
            .field("throttling", &self.throttling)
            .field("actions", &self.actions.len())
            .field("invalid_rules", &self.invalid_rules.len())
            .finish()
    }
}
