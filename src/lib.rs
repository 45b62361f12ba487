//! # Manifest-driven telemetry pipeline
//!
//! Client-side event processing governed by a centrally authored rule
//! manifest. Every posted event runs through one priority-ordered pass of
//! host stages and rules compiled from the active manifest snapshot, then
//! fans out to the registered channels.
//!
//! ## Architecture
//!
//! - **matching**: boolean match trees over event names and properties
//! - **manifest**: forward-compatible document parsing and per-rule validation
//! - **pipeline**: priority-ordered actions, per-event context, the processor
//! - **channel**: sinks, the registration validator chain, the router
//! - **refresh**: manifest sources, the manager owning the active snapshot,
//!   background scheduling
//! - **service**: the facade a host application holds

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod manifest;
pub mod matching;
pub mod pii;
pub mod pipeline;
pub mod property;
pub mod refresh;
pub mod service;
pub mod session;
pub mod types;

pub use channel::{ChannelProperties, ChannelRouter, MemoryChannel, TelemetryChannel};
pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use event::{EventInput, TelemetryEvent};
pub use manifest::Manifest;
pub use pipeline::{EventProcessor, ProcessOutcome};
pub use property::{PiiValue, PropertyValue};
pub use refresh::{ManifestManager, ManifestStatus, RefreshStats};
pub use service::TelemetryService;
pub use session::TelemetrySession;
pub use types::{EventKind, Severity, ThrottlingDecision};
