//! # Telemetry Agent Entry Point
//!
//! Reads JSON-lines events from stdin, posts them through a telemetry
//! service configured from the environment and prints every delivered event
//! to stdout.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use telemetry::channel::ChannelProperties;
use telemetry::manifest::RouteArgument;
use telemetry::{
    EventInput, TelemetryChannel, TelemetryConfig, TelemetryEvent, TelemetryService,
    TelemetrySession,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const DISPOSE_BUDGET: Duration = Duration::from_secs(5);

/// Default channel printing transmitted events as JSON lines.
struct ConsoleChannel;

#[async_trait]
impl TelemetryChannel for ConsoleChannel {
    fn id(&self) -> &str {
        "console"
    }

    fn properties(&self) -> ChannelProperties {
        ChannelProperties::default_channel()
    }

    fn post(&self, event: &TelemetryEvent, routes: &[RouteArgument]) {
        let mut line = event.to_transmitted_json();
        if !routes.is_empty() {
            line["routes"] = json!(routes.iter().map(RouteArgument::to_json).collect::<Vec<_>>());
        }
        println!("{}", line);
    }

    async fn flush(&self) -> telemetry::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("=================================================");
    eprintln!("  Telemetry Agent - Manifest Driven Pipeline     ");
    eprintln!("=================================================");
    eprintln!();

    let config = TelemetryConfig::from_env();
    eprintln!("Configuration:");
    eprintln!(
        "  - Manifest source: {}",
        config.manifest_url.as_deref().unwrap_or("(none, local only)")
    );
    eprintln!("  - Host: {} (schema v{})", config.host_name, config.schema_version);
    eprintln!(
        "  - Refresh: every {}s (enabled: {})",
        config.scheduler.refresh_interval.as_secs(),
        config.scheduler.enabled
    );
    if let Some(file) = &config.file_channel {
        eprintln!("  - File channel: {}", file.base_dir.display());
    }
    eprintln!();

    let session = Arc::new(TelemetrySession::new());
    let service = match TelemetryService::new(config, session) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("✗ Failed to initialize telemetry service: {}", e);
            return Err(e.into());
        }
    };
    service.register_channel(Arc::new(ConsoleChannel))?;

    let status = service.start().await?;
    eprintln!(
        "✓ Session {} started with manifest {} from {}",
        service.session().id(),
        status.version.as_deref().unwrap_or("unversioned"),
        status.source
    );
    for dropped in &status.invalid_rules {
        eprintln!("  - dropped rule {}", dropped);
    }
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event = match EventInput::parse(&line).and_then(EventInput::into_event) {
            Ok(event) => event,
            Err(e) => {
                eprintln!("✗ Skipping line: {}", e);
                continue;
            }
        };
        let outcome = service.post(event)?;
        if outcome.dropped {
            eprintln!(
                "  - {} {}",
                outcome.event.name(),
                if outcome.throttled { "throttled" } else { "dropped" }
            );
        }
    }

    let stats = service.stats();
    eprintln!();
    eprintln!("Pipeline Statistics:");
    eprintln!("  - Posted: {}", stats.posted);
    eprintln!("  - Dropped: {}", stats.dropped);
    eprintln!("  - Throttled: {}", stats.throttled);
    eprintln!("  - Routed: {}", stats.routed);

    service.dispose_async(DISPOSE_BUDGET).await?;

    eprintln!("=================================================");
    eprintln!("  Telemetry Agent Shut Down");
    eprintln!("=================================================");

    Ok(())
}
