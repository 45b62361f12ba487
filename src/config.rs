//! Service configuration, read from the environment by the binaries.

use crate::channel::FileChannelConfig;
use crate::refresh::SchedulerConfig;
use log::warn;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SCHEMA_VERSION: u32 = 2;

/// Configuration for a [`TelemetryService`](crate::service::TelemetryService).
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Base URL of the remote manifest source; no remote refresh when unset
    pub manifest_url: Option<String>,

    /// Host identifier used in the manifest location
    pub host_name: String,

    /// Manifest schema version used in the manifest location
    pub schema_version: u32,

    /// Local copy of the last good manifest
    pub cache_path: Option<PathBuf>,

    /// Global switch; rejects every channel when set
    pub disabled: bool,

    /// Per-channel force enable (`true`) or disable (`false`)
    pub channel_overrides: HashMap<String, bool>,

    /// Background refresh schedule
    pub scheduler: SchedulerConfig,

    /// JSON-lines output; no file channel when unset
    pub file_channel: Option<FileChannelConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            manifest_url: None,
            host_name: "default".to_string(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            cache_path: None,
            disabled: false,
            channel_overrides: HashMap::new(),
            scheduler: SchedulerConfig::default(),
            file_channel: None,
        }
    }
}

impl TelemetryConfig {
    /// Reads `TELEMETRY_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = TelemetryConfig::default();

        config.manifest_url = lookup("TELEMETRY_MANIFEST_URL").filter(|v| !v.trim().is_empty());
        if let Some(host) = lookup("TELEMETRY_HOST_NAME").filter(|v| !v.trim().is_empty()) {
            config.host_name = host;
        }
        if let Some(raw) = lookup("TELEMETRY_MANIFEST_SCHEMA") {
            match raw.trim().parse() {
                Ok(version) => config.schema_version = version,
                Err(_) => warn!("Ignoring invalid TELEMETRY_MANIFEST_SCHEMA {:?}", raw),
            }
        }
        if let Some(raw) = lookup("TELEMETRY_REFRESH_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.scheduler.enabled = false,
                Ok(secs) => config.scheduler.refresh_interval = Duration::from_secs(secs),
                Err(_) => warn!("Ignoring invalid TELEMETRY_REFRESH_SECS {:?}", raw),
            }
        }
        config.cache_path = lookup("TELEMETRY_CACHE_PATH").map(PathBuf::from);
        config.disabled = lookup("TELEMETRY_DISABLED")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        if let Some(raw) = lookup("TELEMETRY_CHANNEL_OVERRIDES") {
            config.channel_overrides = parse_overrides(&raw);
        }
        config.file_channel = lookup("TELEMETRY_LOG_DIR").map(|dir| FileChannelConfig {
            base_dir: PathBuf::from(dir),
            ..FileChannelConfig::default()
        });

        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses `id=1,other=0` into force enable/disable entries. Malformed
/// entries are skipped.
pub fn parse_overrides(raw: &str) -> HashMap<String, bool> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, value) = entry.split_once('=')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            match value.trim() {
                "1" | "true" => Some((id.to_string(), true)),
                "0" | "false" => Some((id.to_string(), false)),
                other => {
                    warn!("Ignoring channel override {}={:?}", id, other);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = TelemetryConfig::from_lookup(|_| None);
        assert!(config.manifest_url.is_none());
        assert_eq!(config.schema_version, 2);
        assert!(!config.disabled);
        assert!(config.scheduler.enabled);
        assert!(config.file_channel.is_none());
    }

    #[test]
    fn test_reads_all_variables() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[
            ("TELEMETRY_MANIFEST_URL", "https://cdn.example.com/manifests"),
            ("TELEMETRY_HOST_NAME", "devenv"),
            ("TELEMETRY_MANIFEST_SCHEMA", "3"),
            ("TELEMETRY_REFRESH_SECS", "60"),
            ("TELEMETRY_CACHE_PATH", "/tmp/manifest.json"),
            ("TELEMETRY_DISABLED", "TRUE"),
            ("TELEMETRY_CHANNEL_OVERRIDES", "sqm=1, ai=0"),
            ("TELEMETRY_LOG_DIR", "/tmp/telemetry"),
        ]));
        assert_eq!(
            config.manifest_url.as_deref(),
            Some("https://cdn.example.com/manifests")
        );
        assert_eq!(config.host_name, "devenv");
        assert_eq!(config.schema_version, 3);
        assert_eq!(config.scheduler.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.cache_path, Some(PathBuf::from("/tmp/manifest.json")));
        assert!(config.disabled);
        assert_eq!(config.channel_overrides.get("sqm"), Some(&true));
        assert_eq!(config.channel_overrides.get("ai"), Some(&false));
        assert_eq!(
            config.file_channel.map(|f| f.base_dir),
            Some(PathBuf::from("/tmp/telemetry"))
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[
            ("TELEMETRY_MANIFEST_SCHEMA", "two"),
            ("TELEMETRY_REFRESH_SECS", "-5"),
            ("TELEMETRY_MANIFEST_URL", "  "),
        ]));
        assert_eq!(config.schema_version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(config.scheduler.refresh_interval.as_secs(), 6 * 60 * 60);
        assert!(config.manifest_url.is_none());
    }

    #[test]
    fn test_zero_refresh_disables_scheduler() {
        let config = TelemetryConfig::from_lookup(lookup_from(&[("TELEMETRY_REFRESH_SECS", "0")]));
        assert!(!config.scheduler.enabled);
    }

    #[test]
    fn test_parse_overrides_skips_malformed_entries() {
        let overrides = parse_overrides("a=1,b,=1,c=maybe,d=false");
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["a"], true);
        assert_eq!(overrides["d"], false);
    }
}
