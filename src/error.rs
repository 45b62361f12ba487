//! Crate-wide error type.
//!
//! Manifest parse and validation failures are recovered inside the manifest
//! manager; only caller-facing failures (naming rules, complex value
//! serialization, disposed use) ever reach instrumentation code.

use thiserror::Error;

/// Single error enum for all telemetry pipeline operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The manifest document is not well-formed.
    #[error("manifest parse error: {source}")]
    ManifestParse {
        #[source]
        source: serde_json::Error,
    },

    /// A rule subtree is structurally invalid. Names the failing construct.
    #[error("manifest validation error: {0}")]
    ManifestValidation(String),

    /// A PII-marked value has no invariant string form.
    #[error("pii conversion error: {0}")]
    PiiConversion(String),

    /// A complex property value could not be serialized.
    #[error("serialization error: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    /// Remote manifest fetch failed.
    #[error("manifest fetch error: {0}")]
    Fetch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),

    #[error("invalid property name: {0:?}")]
    InvalidPropertyName(String),

    /// The service was used after disposal.
    #[error("telemetry service has been disposed")]
    Disposed,

    /// An async operation exceeded its caller-supplied budget.
    #[error("operation timed out")]
    Timeout,
}

impl TelemetryError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TelemetryError::ManifestValidation(message.into())
    }
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        TelemetryError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_construct() {
        let err = TelemetryError::validation("empty and-clause");
        assert_eq!(
            err.to_string(),
            "manifest validation error: empty and-clause"
        );
    }

    #[test]
    fn test_parse_error_wraps_decode_failure() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = TelemetryError::ManifestParse { source };
        assert!(err.to_string().starts_with("manifest parse error"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
