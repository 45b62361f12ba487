//! Output channels and the registration-time validator chain.
//!
//! - [`TelemetryChannel`]: sink receiving processed events
//! - [`ValidatorChain`]: decides once, at registration, whether a channel is active
//! - [`ChannelRouter`]: fans surviving events out to default and routed channels

pub mod file;
pub mod memory;
pub mod router;
pub mod validator;

pub use file::{FileChannel, FileChannelConfig, RotationPolicy};
pub use memory::{MemoryChannel, PostedEvent};
pub use router::ChannelRouter;
pub use validator::{
    ChannelRegistration, ChannelValidator, GlobalSwitchValidator, InternalChannelValidator,
    OverrideValidator, ValidatorChain,
};

use crate::error::Result;
use crate::event::TelemetryEvent;
use crate::manifest::RouteArgument;
use async_trait::async_trait;

/// Static traits of a channel, checked by validators and the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelProperties {
    /// Receives every surviving event, routed or not.
    pub is_default: bool,
    /// Only active for internal users.
    pub internal_only: bool,
    /// Must never receive unhashed PII or complex payloads.
    pub restricted: bool,
}

impl ChannelProperties {
    pub fn default_channel() -> Self {
        Self {
            is_default: true,
            ..Self::default()
        }
    }
}

/// Sink for processed events.
///
/// `post` is called on the posting thread and must not block on I/O;
/// implementations buffer and write in the background.
#[async_trait]
pub trait TelemetryChannel: Send + Sync {
    fn id(&self) -> &str;

    fn properties(&self) -> ChannelProperties;

    /// Hands over one event together with the route arguments addressed to
    /// this channel (empty for default delivery).
    fn post(&self, event: &TelemetryEvent, routes: &[RouteArgument]);

    /// Writes out anything buffered.
    async fn flush(&self) -> Result<()>;
}
