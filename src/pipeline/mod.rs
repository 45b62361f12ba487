//! The priority-ordered action pipeline.
//!
//! Every event runs through one merged pass of host stages and the stages
//! compiled from the current manifest snapshot, in ascending
//! [`ActionPriority`]. A stage returning `false` ends the pass.

pub mod action;
pub mod context;
pub mod host_actions;
pub mod manifest_actions;
pub mod priority;
pub mod processor;

pub use action::EventAction;
pub use context::{OptOutVerdict, ProcessorContext, RoutedArgument};
pub use host_actions::standard_stages;
pub use priority::ActionPriority;
pub use processor::{
    EventProcessor, ManifestProvider, ProcessOutcome, ProcessorStats, StaticManifest,
    SEQUENCE_PROPERTY, SESSION_ID_PROPERTY,
};
