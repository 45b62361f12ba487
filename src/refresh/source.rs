//! Where manifest documents come from and where the last good one is kept.

use crate::error::{Result, TelemetryError};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A remote or local origin of manifest text.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Human readable origin used in status notifications.
    fn describe(&self) -> String;

    /// Fetches the raw document. `bypass_cache` asks intermediaries for a
    /// fresh copy.
    async fn fetch(&self, bypass_cache: bool) -> Result<String>;
}

/// Fetches `{base_url}/{host_name}/v{schema_version}.json` over HTTP.
pub struct HttpManifestSource {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestSource {
    pub fn new(base_url: &str, host_name: &str, schema_version: u32) -> Result<Self> {
        Self::with_timeout(base_url, host_name, schema_version, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: &str,
        host_name: &str,
        schema_version: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: manifest_url(base_url, host_name, schema_version),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Builds the per-host manifest location.
pub fn manifest_url(base_url: &str, host_name: &str, schema_version: u32) -> String {
    format!(
        "{}/{}/v{}.json",
        base_url.trim_end_matches('/'),
        host_name.trim_matches('/'),
        schema_version
    )
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self, bypass_cache: bool) -> Result<String> {
        let mut request = self.client.get(&self.url);
        if bypass_cache {
            request = request
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Fetch(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }
        let text = response.text().await?;
        debug!("Fetched {} bytes of manifest from {}", text.len(), self.url);
        Ok(text)
    }
}

/// Reads the manifest from a file on every fetch.
pub struct FileManifestSource {
    path: PathBuf,
}

impl FileManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ManifestSource for FileManifestSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self, _bypass_cache: bool) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

/// Local copy of the last manifest that parsed successfully.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    path: PathBuf,
}

impl ManifestCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when no cache file exists yet.
    pub async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes to a sibling temp file and renames it over the cache so a
    /// reader never sees a half-written document.
    pub async fn store(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        tokio::fs::write(&tmp_path, text).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_url_shape() {
        assert_eq!(
            manifest_url("https://cdn.example.com/telemetry/", "devenv", 2),
            "https://cdn.example.com/telemetry/devenv/v2.json"
        );
    }

    #[tokio::test]
    async fn test_cache_round_trip_and_missing_file() {
        let dir = tempdir().unwrap();
        let cache = ManifestCache::new(dir.path().join("nested").join("manifest.json"));
        assert!(cache.load().await.unwrap().is_none());

        cache.store(r#"{"actions":[]}"#).await.unwrap();
        cache.store(r#"{"version":"2"}"#).await.unwrap();
        assert_eq!(
            cache.load().await.unwrap().as_deref(),
            Some(r#"{"version":"2"}"#)
        );
        assert!(!dir.path().join("nested").join("manifest.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_source_reports_missing_file() {
        let dir = tempdir().unwrap();
        let source = FileManifestSource::new(dir.path().join("absent.json"));
        assert!(matches!(
            source.fetch(false).await,
            Err(TelemetryError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_http_source_unreachable_host_is_fetch_error() {
        let source = HttpManifestSource::with_timeout(
            "http://127.0.0.1:9",
            "devenv",
            2,
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(source.url(), "http://127.0.0.1:9/devenv/v2.json");
        assert!(matches!(
            source.fetch(true).await,
            Err(TelemetryError::Fetch(_))
        ));
    }
}
