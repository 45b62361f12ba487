//! Service lifecycle tests: initial load, refresh, disposal.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::channel::{ChannelProperties, MemoryChannel};
use telemetry::manifest::RouteArgument;
use telemetry::refresh::{FileManifestSource, ManagerState, ManifestOrigin, StatusKind};
use telemetry::{
    TelemetryChannel, TelemetryConfig, TelemetryError, TelemetryEvent, TelemetryService,
    TelemetrySession,
};
use tempfile::{tempdir, TempDir};

const EXCLUDE_ALL: &str = r#"{"version": "2024.1", "actions": [
    {"when": {"property": "Secret", "value": {"exists": true}}, "excludeForChannels": ["*"]}
]}"#;

fn local_config(dir: &TempDir) -> TelemetryConfig {
    let mut config = TelemetryConfig::default();
    config.cache_path = Some(dir.path().join("cache").join("manifest.json"));
    config.scheduler.enabled = false;
    config
}

fn service_with_file(dir: &TempDir, manifest: &str) -> TelemetryService {
    let manifest_path = dir.path().join("remote.json");
    std::fs::write(&manifest_path, manifest).unwrap();
    TelemetryService::with_source(
        local_config(dir),
        Arc::new(TelemetrySession::new()),
        Some(Arc::new(FileManifestSource::new(manifest_path))),
    )
    .unwrap()
}

fn secret_event() -> TelemetryEvent {
    TelemetryEvent::new("Op/Build")
        .unwrap()
        .with_property("Secret", "x")
        .unwrap()
}

#[tokio::test]
async fn test_start_uses_bundled_default_then_refresh_applies_manifest() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, EXCLUDE_ALL);
    let channel = Arc::new(MemoryChannel::default_channel("default"));
    assert!(service.register_channel(channel.clone()).unwrap());

    let status = service.start().await.unwrap();
    assert_eq!(status.source, ManifestOrigin::Bundled);
    assert!(!service.post(secret_event()).unwrap().dropped);

    let stats = service.force_refresh().await.unwrap();
    assert_eq!(stats.rules_loaded, 1);
    assert_eq!(service.current_manifest().version(), Some("2024.1"));
    assert!(service.post(secret_event()).unwrap().dropped);
    assert_eq!(channel.len(), 1);
}

#[tokio::test]
async fn test_refreshed_manifest_is_cached_for_next_start() {
    let dir = tempdir().unwrap();
    {
        let service = service_with_file(&dir, EXCLUDE_ALL);
        service.start().await.unwrap();
        service.force_refresh().await.unwrap();
    }

    let service = TelemetryService::with_source(
        local_config(&dir),
        Arc::new(TelemetrySession::new()),
        None,
    )
    .unwrap();
    let status = service.start().await.unwrap();
    assert_eq!(status.source, ManifestOrigin::Cache);
    assert_eq!(status.version.as_deref(), Some("2024.1"));
}

#[tokio::test]
async fn test_bad_refresh_keeps_active_manifest() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, EXCLUDE_ALL);
    service.start().await.unwrap();
    service.force_refresh().await.unwrap();

    std::fs::write(dir.path().join("remote.json"), "{\"actions\": [").unwrap();
    let mut statuses = service.subscribe();
    let err = service.force_refresh().await.unwrap_err();
    assert!(matches!(err, TelemetryError::Fetch(_)));

    let status = statuses.recv().await.unwrap();
    assert_eq!(status.kind, StatusKind::Failed);
    assert_eq!(service.manager().state(), ManagerState::Failed);
    assert_eq!(service.current_manifest().actions().len(), 1);
    assert!(service.post(secret_event()).unwrap().dropped);
}

#[tokio::test]
async fn test_scheduled_refresh_runs_in_background() {
    let dir = tempdir().unwrap();
    let manifest_path = dir.path().join("remote.json");
    std::fs::write(&manifest_path, EXCLUDE_ALL).unwrap();

    let mut config = local_config(&dir);
    config.scheduler.enabled = true;
    config.scheduler.refresh_interval = Duration::from_millis(20);
    config.scheduler.jitter = Duration::ZERO;
    let service = TelemetryService::with_source(
        config,
        Arc::new(TelemetrySession::new()),
        Some(Arc::new(FileManifestSource::new(manifest_path))),
    )
    .unwrap();

    let mut statuses = service.subscribe();
    service.start().await.unwrap();
    loop {
        let status = tokio::time::timeout(Duration::from_secs(5), statuses.recv())
            .await
            .unwrap()
            .unwrap();
        if status.kind == StatusKind::Refreshed {
            break;
        }
    }
    assert_eq!(service.current_manifest().version(), Some("2024.1"));
    assert!(service.manager().last_refresh() > 0);
    service.dispose_async(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_failed_background_refresh_leaves_service_serving() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, "{\"actions\": [");
    service.start().await.unwrap();
    let mut statuses = service.subscribe();

    service.request_refresh().unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), statuses.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.kind, StatusKind::Failed);
    assert!(status.error.is_some());
    assert_eq!(service.current_manifest().version(), Some("bundled"));
    assert!(!service.post(secret_event()).unwrap().dropped);
}

#[tokio::test]
async fn test_disposed_service_rejects_use() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, EXCLUDE_ALL);
    service.start().await.unwrap();
    service.dispose();

    assert!(service.is_disposed());
    assert!(matches!(
        service.post(secret_event()),
        Err(TelemetryError::Disposed)
    ));
    assert!(matches!(
        service.force_refresh().await,
        Err(TelemetryError::Disposed)
    ));
    assert!(service.register_channel(Arc::new(MemoryChannel::default_channel("late"))).is_err());
}

#[tokio::test]
async fn test_disabled_switch_rejects_every_channel() {
    let dir = tempdir().unwrap();
    let mut config = local_config(&dir);
    config.disabled = true;
    config.channel_overrides.insert("forced".to_string(), true);
    let service =
        TelemetryService::with_source(config, Arc::new(TelemetrySession::new()), None).unwrap();

    assert!(!service.register_channel(Arc::new(MemoryChannel::routed("forced"))).unwrap());
    assert!(service.router().is_empty());
}

/// Channel whose flush takes a fixed time.
struct SlowChannel {
    delay: Duration,
    flushes: AtomicUsize,
}

#[async_trait]
impl TelemetryChannel for SlowChannel {
    fn id(&self) -> &str {
        "slow"
    }

    fn properties(&self) -> ChannelProperties {
        ChannelProperties::default_channel()
    }

    fn post(&self, _event: &TelemetryEvent, _routes: &[RouteArgument]) {}

    async fn flush(&self) -> telemetry::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_dispose_async_flushes_within_budget() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, EXCLUDE_ALL);
    let channel = Arc::new(SlowChannel {
        delay: Duration::from_millis(10),
        flushes: AtomicUsize::new(0),
    });
    service.register_channel(channel.clone()).unwrap();
    service.start().await.unwrap();

    service.dispose_async(Duration::from_secs(2)).await.unwrap();
    assert_eq!(channel.flushes.load(Ordering::SeqCst), 1);
    assert!(service.is_disposed());
}

#[tokio::test]
async fn test_dispose_async_times_out() {
    let dir = tempdir().unwrap();
    let service = service_with_file(&dir, EXCLUDE_ALL);
    service
        .register_channel(Arc::new(SlowChannel {
            delay: Duration::from_secs(10),
            flushes: AtomicUsize::new(0),
        }))
        .unwrap();
    service.start().await.unwrap();

    let result = service.dispose_async(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(TelemetryError::Timeout)));
    assert!(service.is_disposed());
}
