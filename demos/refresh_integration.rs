//! Example: hot-swapping the manifest while events are being posted.
//!
//! Writes a manifest file, starts a service refreshing from it every
//! 200ms, rewrites the file and shows events picking up the new rules.
//!
//! Run with: `cargo run --example refresh_integration`

use std::sync::Arc;
use std::time::Duration;
use telemetry::channel::MemoryChannel;
use telemetry::refresh::{FileManifestSource, StatusKind};
use telemetry::{TelemetryConfig, TelemetryEvent, TelemetryService, TelemetrySession};

const ROUTE_PRO: &str = r#"{"version": "1", "actions": [
    {"when": {"property": "VS.Core.SKU", "value": {"eq": "Pro"}},
     "route": [{"channelId": "sqm", "args": {"datapointId": 101}}]}
]}"#;

const EXCLUDE_PRO: &str = r#"{"version": "2", "actions": [
    {"when": {"property": "VS.Core.SKU", "value": {"eq": "Pro"}}, "excludeForChannels": ["*"]},
    {"unknownFutureRule": {"sample": 0.1}}
]}"#;

fn build_event() -> Result<TelemetryEvent, telemetry::TelemetryError> {
    TelemetryEvent::new("Op/Build")?.with_property("VS.Core.SKU", "Pro")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=================================================");
    println!("  Manifest Refresh Integration Example");
    println!("=================================================");
    println!();

    let dir = std::env::temp_dir().join(format!("telemetry-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let manifest_path = dir.join("manifest.json");
    std::fs::write(&manifest_path, ROUTE_PRO)?;

    let mut config = TelemetryConfig::default();
    config.cache_path = Some(dir.join("cache.json"));
    config.scheduler.refresh_interval = Duration::from_millis(200);
    config.scheduler.jitter = Duration::ZERO;

    println!("1. Starting service (refresh every 200ms from {})", manifest_path.display());
    let service = TelemetryService::with_source(
        config,
        Arc::new(TelemetrySession::new()),
        Some(Arc::new(FileManifestSource::new(&manifest_path))),
    )?;
    let default = Arc::new(MemoryChannel::default_channel("default"));
    let sqm = Arc::new(MemoryChannel::routed("sqm"));
    service.register_channel(default.clone())?;
    service.register_channel(sqm.clone())?;

    let mut statuses = service.subscribe();
    let status = service.start().await?;
    println!("   - initial manifest: {:?} from {}", status.version, status.source);

    wait_for_version(&mut statuses, "1").await;
    let outcome = service.post(build_event()?)?;
    println!("   - version 1: routes={} dropped={}", outcome.routes.len(), outcome.dropped);
    println!();

    println!("2. Rewriting the manifest on disk");
    std::fs::write(&manifest_path, EXCLUDE_PRO)?;
    wait_for_version(&mut statuses, "2").await;
    for dropped in service.current_manifest().invalid_rules() {
        println!("   - dropped rule {}", dropped);
    }
    let outcome = service.post(build_event()?)?;
    println!("   - version 2: routes={} dropped={}", outcome.routes.len(), outcome.dropped);
    println!();

    println!("3. Breaking the manifest; the previous one stays active");
    std::fs::write(&manifest_path, "{\"actions\": [")?;
    match service.force_refresh().await {
        Ok(_) => println!("   - unexpected success"),
        Err(e) => println!("   - refresh failed: {}", e),
    }
    println!(
        "   - still serving version {:?}",
        service.current_manifest().version()
    );
    println!();

    let stats = service.stats();
    println!("Pipeline Statistics:");
    println!("  - Posted: {}", stats.posted);
    println!("  - Dropped: {}", stats.dropped);
    println!("  - Routed: {}", stats.routed);
    println!("  - Default channel received: {}", default.len());
    println!("  - SQM channel received: {}", sqm.len());

    service.dispose_async(Duration::from_secs(2)).await?;
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

async fn wait_for_version(
    statuses: &mut tokio::sync::broadcast::Receiver<telemetry::ManifestStatus>,
    version: &str,
) {
    while let Ok(status) = statuses.recv().await {
        if status.kind == StatusKind::Refreshed && status.version.as_deref() == Some(version) {
            return;
        }
    }
}
