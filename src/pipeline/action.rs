//! The stage trait every pipeline action implements.

use super::context::ProcessorContext;
use super::priority::ActionPriority;
use crate::event::TelemetryEvent;

/// One stage of the ordered event pipeline.
///
/// Stages are shared across threads and must keep per-event state in the
/// [`ProcessorContext`]. Each stage decides on its own whether it applies
/// (session opted out, predicate matched, event already dropped).
pub trait EventAction: Send + Sync {
    fn priority(&self) -> ActionPriority;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Runs the stage. Returning `false` stops the pass for this event.
    fn execute(&self, event: &mut TelemetryEvent, ctx: &mut ProcessorContext) -> bool;
}
