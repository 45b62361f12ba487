//! In-memory channel, used by tests and the manifest tool.

use super::{ChannelProperties, TelemetryChannel};
use crate::error::Result;
use crate::event::TelemetryEvent;
use crate::manifest::RouteArgument;
use async_trait::async_trait;
use parking_lot::Mutex;

/// An event as delivered to a channel.
#[derive(Debug, Clone)]
pub struct PostedEvent {
    pub event: TelemetryEvent,
    pub routes: Vec<RouteArgument>,
}

/// Keeps every posted event in memory.
pub struct MemoryChannel {
    id: String,
    properties: ChannelProperties,
    posted: Mutex<Vec<PostedEvent>>,
}

impl MemoryChannel {
    pub fn new(id: impl Into<String>, properties: ChannelProperties) -> Self {
        Self {
            id: id.into(),
            properties,
            posted: Mutex::new(Vec::new()),
        }
    }

    /// A default channel receiving every surviving event.
    pub fn default_channel(id: impl Into<String>) -> Self {
        Self::new(id, ChannelProperties::default_channel())
    }

    /// A channel that only receives events routed to it.
    pub fn routed(id: impl Into<String>) -> Self {
        Self::new(id, ChannelProperties::default())
    }

    pub fn events(&self) -> Vec<PostedEvent> {
        self.posted.lock().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .map(|p| p.event.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.posted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posted.lock().is_empty()
    }

    pub fn clear(&self) {
        self.posted.lock().clear();
    }
}

#[async_trait]
impl TelemetryChannel for MemoryChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn properties(&self) -> ChannelProperties {
        self.properties
    }

    fn post(&self, event: &TelemetryEvent, routes: &[RouteArgument]) {
        self.posted.lock().push(PostedEvent {
            event: event.clone(),
            routes: routes.to_vec(),
        });
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
