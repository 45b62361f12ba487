//! Manifest authoring tool: validate documents and evaluate events against
//! them without a running host.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use telemetry::channel::{ChannelRouter, MemoryChannel, ValidatorChain};
use telemetry::manifest::{Manifest, RouteArgument};
use telemetry::pipeline::{EventProcessor, StaticManifest};
use telemetry::{EventInput, TelemetrySession};

/// Inspect telemetry manifests.
#[derive(Parser, Debug)]
#[command(name = "manifest-tool", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a manifest and list kept and dropped rules
    Validate {
        /// Manifest document
        file: PathBuf,
    },

    /// Run one event through the pipeline with the given manifest
    Eval {
        /// Manifest document
        manifest: PathBuf,

        /// Event as a JSON object
        event: String,

        /// Evaluate as an opted-out session
        #[arg(long)]
        opted_out: bool,

        /// Register an extra routed channel with this id
        #[arg(long = "channel")]
        channels: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Eval {
            manifest,
            event,
            opted_out,
            channels,
        } => eval(&manifest, &event, opted_out, &channels),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn load(path: &PathBuf) -> Result<Manifest, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(Manifest::parse(&text)?)
}

fn validate(path: &PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let manifest = load(path)?;

    println!("Manifest: {}", path.display());
    println!("  - Version: {}", manifest.version().unwrap_or("(none)"));
    println!(
        "  - Throttling: {} events per {}s",
        manifest.throttling().threshold,
        manifest.throttling().window.as_secs()
    );
    println!();

    println!("Kept rules ({}):", manifest.actions().len());
    for action in manifest.actions() {
        let scope = if action.when.is_some() { "conditional" } else { "always" };
        println!("  - {:<26} ({})", action.kind.key(), scope);
    }

    if !manifest.invalid_rules().is_empty() {
        println!();
        println!("Dropped rules ({}):", manifest.invalid_rules().len());
        for dropped in manifest.invalid_rules() {
            println!("  - {}", dropped);
        }
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn eval(
    path: &PathBuf,
    event_json: &str,
    opted_out: bool,
    channels: &[String],
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let manifest = load(path)?;
    let event = EventInput::parse(event_json)?.into_event()?;

    let session = Arc::new(TelemetrySession::new());
    session.set_opted_out(opted_out);

    let router = Arc::new(ChannelRouter::new(ValidatorChain::permissive()));
    router.register(Arc::new(MemoryChannel::default_channel("default")));
    for id in channels {
        router.register(Arc::new(MemoryChannel::routed(id.as_str())));
    }

    let processor = EventProcessor::new(session, router, Arc::new(StaticManifest::new(manifest)));
    let outcome = processor.process(event);

    let routes: Vec<_> = outcome
        .routes
        .iter()
        .map(|r| json!({ "channelId": r.channel_id, "argument": RouteArgument::to_json(&r.argument) }))
        .collect();
    let report = json!({
        "dropped": outcome.dropped,
        "throttled": outcome.throttled,
        "throttling": format!("{:?}", outcome.throttling),
        "excludedChannels": outcome.excluded_channels,
        "routes": routes,
        "delivered": outcome.delivered,
        "event": outcome.event.to_transmitted_json(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}
