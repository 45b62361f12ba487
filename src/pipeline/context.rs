//! Per-event scratch state threaded through the pipeline.

use crate::channel::ChannelRouter;
use crate::manifest::{Manifest, RouteArgument};
use crate::property::NameSet;
use crate::session::TelemetrySession;
use crate::types::ThrottlingDecision;
use std::sync::Arc;

/// Outcome of opt-out filtering for the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptOutVerdict {
    /// Session not opted out, or no stage has ruled yet.
    #[default]
    Undecided,
    Allowed,
    Denied,
}

/// Route argument accumulated for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedArgument {
    pub channel_id: String,
    pub argument: RouteArgument,
}

/// Mutable per-event record. Reused across events by the processor's pool,
/// never shared between two events in flight.
pub struct ProcessorContext {
    session: Arc<TelemetrySession>,
    router: Arc<ChannelRouter>,
    manifest: Arc<Manifest>,
    dropped: bool,
    throttled: bool,
    throttling: ThrottlingDecision,
    opt_out: OptOutVerdict,
    routes: Vec<RoutedArgument>,
    excluded_channels: NameSet,
}

impl ProcessorContext {
    pub fn new(
        session: Arc<TelemetrySession>,
        router: Arc<ChannelRouter>,
        manifest: Arc<Manifest>,
    ) -> Self {
        Self {
            session,
            router,
            manifest,
            dropped: false,
            throttled: false,
            throttling: ThrottlingDecision::Unset,
            opt_out: OptOutVerdict::Undecided,
            routes: Vec::new(),
            excluded_channels: NameSet::new(),
        }
    }

    /// Binds the context to a manifest snapshot and clears per-event state.
    /// Buffers keep their capacity.
    pub fn reset(&mut self, manifest: Arc<Manifest>) {
        self.manifest = manifest;
        self.dropped = false;
        self.throttled = false;
        self.throttling = ThrottlingDecision::Unset;
        self.opt_out = OptOutVerdict::Undecided;
        self.routes.clear();
        self.excluded_channels.clear();
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn session(&self) -> &TelemetrySession {
        &self.session
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    // ============================================================================================
    // DROP / THROTTLE
    // ============================================================================================

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    /// Drops the event because a rate limit was hit.
    pub fn mark_throttled(&mut self) {
        self.dropped = true;
        self.throttled = true;
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    pub fn throttling(&self) -> ThrottlingDecision {
        self.throttling
    }

    /// Overwrites the decision; the last stage or rule to set it wins.
    pub fn set_throttling(&mut self, decision: ThrottlingDecision) {
        self.throttling = decision;
    }

    // ============================================================================================
    // OPT-OUT
    // ============================================================================================

    pub fn opt_out(&self) -> OptOutVerdict {
        self.opt_out
    }

    pub fn set_opt_out(&mut self, verdict: OptOutVerdict) {
        self.opt_out = verdict;
    }

    // ============================================================================================
    // ROUTING
    // ============================================================================================

    pub fn add_route(&mut self, channel_id: &str, argument: RouteArgument) {
        self.routes.push(RoutedArgument {
            channel_id: channel_id.to_string(),
            argument,
        });
    }

    pub fn routes(&self) -> &[RoutedArgument] {
        &self.routes
    }

    pub fn exclude_channel(&mut self, channel_id: &str) {
        self.excluded_channels.insert(channel_id);
    }

    pub fn is_channel_excluded(&self, channel_id: &str) -> bool {
        self.excluded_channels.contains(channel_id)
    }

    pub fn excluded_channels(&self) -> &NameSet {
        &self.excluded_channels
    }
}
