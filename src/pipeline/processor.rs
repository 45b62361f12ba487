//! The event processor: binds a manifest snapshot to a pooled context and
//! runs host and manifest stages in one priority-ordered pass.

use super::action::EventAction;
use super::context::{ProcessorContext, RoutedArgument};
use super::host_actions;
use crate::channel::ChannelRouter;
use crate::event::TelemetryEvent;
use crate::manifest::Manifest;
use crate::property::PropertyValue;
use crate::session::TelemetrySession;
use crate::types::ThrottlingDecision;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SESSION_ID_PROPERTY: &str = "Reserved.SessionId";
pub const SEQUENCE_PROPERTY: &str = "Reserved.Sequence";

const MAX_POOLED_CONTEXTS: usize = 16;

/// Source of the manifest snapshot each event is evaluated against.
pub trait ManifestProvider: Send + Sync {
    fn current(&self) -> Arc<Manifest>;
}

/// A manifest held in place, replaced only by explicit calls.
pub struct StaticManifest {
    manifest: RwLock<Arc<Manifest>>,
}

impl StaticManifest {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest: RwLock::new(Arc::new(manifest)),
        }
    }

    pub fn replace(&self, manifest: Manifest) {
        *self.manifest.write() = Arc::new(manifest);
    }
}

impl ManifestProvider for StaticManifest {
    fn current(&self) -> Arc<Manifest> {
        self.manifest.read().clone()
    }
}

/// What happened to one posted event.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// The event after every stage ran.
    pub event: TelemetryEvent,
    pub dropped: bool,
    pub throttled: bool,
    pub throttling: ThrottlingDecision,
    pub routes: Vec<RoutedArgument>,
    /// Ids of the channels that received the event.
    pub delivered: Vec<String>,
    /// Case-folded ids of channels excluded for this event, sorted.
    pub excluded_channels: Vec<String>,
}

#[derive(Debug, Default)]
struct ProcessorCounters {
    posted: AtomicU64,
    dropped: AtomicU64,
    throttled: AtomicU64,
    routed: AtomicU64,
}

/// Processor statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorStats {
    pub posted: u64,
    /// Dropped by exclusion, opt-out, metric or setting rules.
    pub dropped: u64,
    pub throttled: u64,
    /// Events that carried at least one route argument.
    pub routed: u64,
}

/// Thread-safe event processor shared by every posting thread.
pub struct EventProcessor {
    session: Arc<TelemetrySession>,
    router: Arc<ChannelRouter>,
    manifests: Arc<dyn ManifestProvider>,
    host_stages: Vec<Arc<dyn EventAction>>,
    pool: Mutex<Vec<ProcessorContext>>,
    sequence: AtomicU64,
    counters: ProcessorCounters,
}

impl EventProcessor {
    /// Creates a processor running the standard host stages.
    pub fn new(
        session: Arc<TelemetrySession>,
        router: Arc<ChannelRouter>,
        manifests: Arc<dyn ManifestProvider>,
    ) -> Self {
        Self::with_host_stages(session, router, manifests, host_actions::standard_stages())
    }

    pub fn with_host_stages(
        session: Arc<TelemetrySession>,
        router: Arc<ChannelRouter>,
        manifests: Arc<dyn ManifestProvider>,
        mut host_stages: Vec<Arc<dyn EventAction>>,
    ) -> Self {
        host_stages.sort_by_key(|stage| stage.priority());
        Self {
            session,
            router,
            manifests,
            host_stages,
            pool: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            counters: ProcessorCounters::default(),
        }
    }

    pub fn session(&self) -> &Arc<TelemetrySession> {
        &self.session
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    /// Runs the pipeline for one event and dispatches it unless dropped.
    ///
    /// The manifest snapshot is read once; a concurrent swap does not
    /// affect an event already in the pipeline.
    pub fn process(&self, mut event: TelemetryEvent) -> ProcessOutcome {
        self.counters.posted.fetch_add(1, Ordering::Relaxed);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let bag = event.properties_mut();
            bag.insert(
                SESSION_ID_PROPERTY,
                PropertyValue::String(self.session.id().to_string()),
            );
            bag.insert(SEQUENCE_PROPERTY, PropertyValue::from(sequence));
        }

        let manifest = self.manifests.current();
        let mut ctx = self.acquire_context(manifest.clone());

        run_stages(&self.host_stages, manifest.stages(), &mut event, &mut ctx);

        let mut excluded_channels: Vec<String> =
            ctx.excluded_channels().iter().map(str::to_string).collect();
        excluded_channels.sort();

        let outcome = if ctx.is_dropped() {
            if ctx.is_throttled() {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            debug!("Event {} (#{}) dropped", event.name(), sequence);
            ProcessOutcome {
                dropped: true,
                throttled: ctx.is_throttled(),
                throttling: ctx.throttling(),
                routes: Vec::new(),
                delivered: Vec::new(),
                excluded_channels,
                event,
            }
        } else {
            if !ctx.routes().is_empty() {
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
            }
            let delivered = self
                .router
                .dispatch(&event, ctx.routes(), ctx.excluded_channels());
            ProcessOutcome {
                dropped: false,
                throttled: false,
                throttling: ctx.throttling(),
                routes: ctx.routes().to_vec(),
                delivered,
                excluded_channels,
                event,
            }
        };

        self.release_context(ctx);
        outcome
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            posted: self.counters.posted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            routed: self.counters.routed.load(Ordering::Relaxed),
        }
    }

    fn acquire_context(&self, manifest: Arc<Manifest>) -> ProcessorContext {
        let pooled = self.pool.lock().pop();
        match pooled {
            Some(mut ctx) => {
                ctx.reset(manifest);
                ctx
            }
            None => ProcessorContext::new(self.session.clone(), self.router.clone(), manifest),
        }
    }

    fn release_context(&self, ctx: ProcessorContext) {
        let mut pool = self.pool.lock();
        if pool.len() < MAX_POOLED_CONTEXTS {
            pool.push(ctx);
        }
    }
}

/// Merges two priority-sorted stage lists and runs them until a stage
/// vetoes. On equal priority host stages run first.
fn run_stages(
    host: &[Arc<dyn EventAction>],
    manifest: &[Arc<dyn EventAction>],
    event: &mut TelemetryEvent,
    ctx: &mut ProcessorContext,
) {
    let (mut h, mut m) = (0, 0);
    loop {
        let stage = match (host.get(h), manifest.get(m)) {
            (Some(a), Some(b)) if a.priority() <= b.priority() => {
                h += 1;
                a
            }
            (_, Some(b)) => {
                m += 1;
                b
            }
            (Some(a), None) => {
                h += 1;
                a
            }
            (None, None) => break,
        };
        if !stage.execute(event, ctx) {
            debug!("Stage {} stopped the pass for {}", stage.name(), event.name());
            break;
        }
    }
}
