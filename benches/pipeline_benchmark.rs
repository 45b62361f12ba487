//! Benchmarks for the per-event pipeline pass.
//!
//! Run with: cargo bench --bench pipeline_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use telemetry::channel::{ChannelRouter, MemoryChannel, TelemetryChannel, ValidatorChain};
use telemetry::manifest::Manifest;
use telemetry::pipeline::{EventProcessor, StaticManifest};
use telemetry::{TelemetryEvent, TelemetrySession};

/// Manifest with `rules` routed rules scoped to distinct SKUs plus one PII
/// rule and one throttle rule.
fn build_manifest(rules: usize) -> Manifest {
    let mut actions: Vec<serde_json::Value> = (0..rules)
        .map(|i| {
            serde_json::json!({
                "when": {"and": [
                    {"property": "VS.Core.SKU", "value": {"eq": format!("sku-{}", i)}},
                    {"property": "Duration", "value": {"gt": 10}}
                ]},
                "route": [{"channelId": "sqm", "args": {"datapointId": i + 1}}]
            })
        })
        .collect();
    actions.push(serde_json::json!({"piiProperties": ["User.Email"]}));
    actions.push(serde_json::json!({
        "when": {"property": "Op", "value": {"startsWith": "build"}},
        "throttle": true
    }));
    let text = serde_json::json!({
        "throttlingThreshold": u32::MAX,
        "actions": actions
    })
    .to_string();
    Manifest::parse(&text).unwrap()
}

fn build_processor(rules: usize) -> (EventProcessor, Arc<MemoryChannel>) {
    let router = Arc::new(ChannelRouter::new(ValidatorChain::permissive()));
    let channel = Arc::new(MemoryChannel::routed("sqm"));
    router.register(channel.clone() as Arc<dyn TelemetryChannel>);
    let processor = EventProcessor::new(
        Arc::new(TelemetrySession::new()),
        router,
        Arc::new(StaticManifest::new(build_manifest(rules))),
    );
    (processor, channel)
}

fn build_event(i: usize) -> TelemetryEvent {
    TelemetryEvent::new("VS/Core/Build")
        .unwrap()
        .with_property("VS.Core.SKU", format!("sku-{}", i % 8))
        .unwrap()
        .with_property("Duration", 120)
        .unwrap()
        .with_property("Op", "BuildSolution")
        .unwrap()
        .with_property("User.Email", "someone@example.com")
        .unwrap()
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_process");

    for rules in [0usize, 8, 64] {
        let (processor, channel) = build_processor(rules);
        let mut i = 0usize;
        group.bench_with_input(BenchmarkId::new("rules", rules), &rules, |b, _| {
            b.iter(|| {
                i += 1;
                let outcome = processor.process(black_box(build_event(i)));
                if i % 1024 == 0 {
                    channel.clear();
                }
                black_box(outcome.routes.len())
            });
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let actions: Vec<_> = (0..64)
        .map(|i| serde_json::json!({"optOutIncludeEvents": [format!("Op/Event{}", i)]}))
        .collect();
    let text = serde_json::json!({"actions": actions}).to_string();

    c.bench_function("manifest_parse_64_rules", |b| {
        b.iter(|| Manifest::parse(black_box(&text)).unwrap().actions().len())
    });
}

criterion_group!(benches, bench_process, bench_parse);
criterion_main!(benches);
