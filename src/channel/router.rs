//! Fan-out of processed events to registered channels.

use super::validator::{ChannelRegistration, ValidatorChain};
use super::{ChannelProperties, TelemetryChannel};
use crate::error::Result;
use crate::event::TelemetryEvent;
use crate::pipeline::RoutedArgument;
use crate::property::{eq_ignore_case, NameSet};
use log::{info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

struct RegisteredChannel {
    channel: Arc<dyn TelemetryChannel>,
    /// Properties after validators ran; may differ from the channel's own.
    properties: ChannelProperties,
}

/// Active output set.
///
/// Default channels receive every surviving event; other channels receive
/// only events routed to them. Excluded channels never receive the event.
pub struct ChannelRouter {
    validators: ValidatorChain,
    channels: RwLock<Vec<RegisteredChannel>>,
}

impl ChannelRouter {
    pub fn new(validators: ValidatorChain) -> Self {
        Self {
            validators,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Runs the validator chain once and adds the channel if it passes.
    /// A channel with an already registered id replaces the previous one.
    pub fn register(&self, channel: Arc<dyn TelemetryChannel>) -> bool {
        let mut registration = ChannelRegistration {
            id: channel.id().to_string(),
            properties: channel.properties(),
        };

        if let Some(validator) = self.validators.rejected_by(&mut registration) {
            warn!(
                "Channel {} rejected by {} validator",
                registration.id, validator
            );
            return false;
        }

        let mut channels = self.channels.write();
        channels.retain(|c| !eq_ignore_case(c.channel.id(), &registration.id));
        channels.push(RegisteredChannel {
            channel,
            properties: registration.properties,
        });
        info!(
            "Channel {} registered (default: {}, restricted: {})",
            registration.id, registration.properties.is_default, registration.properties.restricted
        );
        true
    }

    pub fn unregister(&self, channel_id: &str) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| !eq_ignore_case(c.channel.id(), channel_id));
        channels.len() != before
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .map(|c| c.channel.id().to_string())
            .collect()
    }

    /// Effective properties of a registered channel.
    pub fn properties_of(&self, channel_id: &str) -> Option<ChannelProperties> {
        self.channels
            .read()
            .iter()
            .find(|c| eq_ignore_case(c.channel.id(), channel_id))
            .map(|c| c.properties)
    }

    pub fn restricted_channel_ids(&self) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .filter(|c| c.properties.restricted)
            .map(|c| c.channel.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Posts the event to every eligible channel and returns the ids that
    /// received it.
    pub fn dispatch(
        &self,
        event: &TelemetryEvent,
        routes: &[RoutedArgument],
        excluded: &NameSet,
    ) -> Vec<String> {
        let channels = self.channels.read();
        let mut delivered = Vec::new();

        for registered in channels.iter() {
            let id = registered.channel.id();
            if excluded.contains(id) {
                continue;
            }
            let args: Vec<_> = routes
                .iter()
                .filter(|r| eq_ignore_case(&r.channel_id, id))
                .map(|r| r.argument.clone())
                .collect();
            if registered.properties.is_default || !args.is_empty() {
                registered.channel.post(event, &args);
                delivered.push(id.to_string());
            }
        }
        delivered
    }

    /// Flushes every channel in turn. All channels are flushed even if one
    /// fails; the first error is returned.
    pub async fn flush_all(&self) -> Result<()> {
        let channels: Vec<Arc<dyn TelemetryChannel>> = self
            .channels
            .read()
            .iter()
            .map(|c| c.channel.clone())
            .collect();

        let mut first_error = None;
        for channel in channels {
            if let Err(e) = channel.flush().await {
                warn!("Channel {} failed to flush: {}", channel.id(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::manifest::RouteArgument;
    use crate::session::TelemetrySession;
    use std::collections::HashMap;

    fn event() -> TelemetryEvent {
        TelemetryEvent::new("Op/Build").unwrap()
    }

    fn routed_to(channel_id: &str) -> Vec<RoutedArgument> {
        vec![RoutedArgument {
            channel_id: channel_id.to_string(),
            argument: RouteArgument::Datapoint(5),
        }]
    }

    #[test]
    fn test_default_and_routed_delivery() {
        let router = ChannelRouter::new(ValidatorChain::permissive());
        let default = Arc::new(MemoryChannel::default_channel("default"));
        let sqm = Arc::new(MemoryChannel::routed("sqm"));
        router.register(default.clone());
        router.register(sqm.clone());

        let delivered = router.dispatch(&event(), &[], &NameSet::new());
        assert_eq!(delivered, vec!["default".to_string()]);
        assert!(sqm.is_empty());

        let delivered = router.dispatch(&event(), &routed_to("SQM"), &NameSet::new());
        assert_eq!(delivered.len(), 2);
        assert_eq!(sqm.events()[0].routes, vec![RouteArgument::Datapoint(5)]);
        assert!(default.events()[1].routes.is_empty());
    }

    #[test]
    fn test_excluded_channels_never_receive() {
        let router = ChannelRouter::new(ValidatorChain::permissive());
        let default = Arc::new(MemoryChannel::default_channel("default"));
        router.register(default.clone());

        let excluded: NameSet = ["DEFAULT"].into_iter().collect();
        assert!(router.dispatch(&event(), &[], &excluded).is_empty());
        assert!(default.is_empty());
    }

    #[test]
    fn test_rejected_channel_is_not_registered() {
        let router = ChannelRouter::new(ValidatorChain::standard(
            true,
            Arc::new(TelemetrySession::new()),
            &HashMap::new(),
        ));
        assert!(!router.register(Arc::new(MemoryChannel::default_channel("default"))));
        assert!(router.is_empty());
    }

    #[test]
    fn test_reregistration_replaces_channel() {
        let router = ChannelRouter::new(ValidatorChain::permissive());
        router.register(Arc::new(MemoryChannel::default_channel("a")));
        router.register(Arc::new(MemoryChannel::routed("A")));
        assert_eq!(router.len(), 1);
        assert_eq!(router.properties_of("a").map(|p| p.is_default), Some(false));
        assert!(router.unregister("a"));
        assert!(router.is_empty());
    }

    #[test]
    fn test_restricted_channel_ids() {
        let router = ChannelRouter::new(ValidatorChain::permissive());
        router.register(Arc::new(MemoryChannel::new(
            "ai",
            ChannelProperties {
                is_default: true,
                restricted: true,
                ..ChannelProperties::default()
            },
        )));
        router.register(Arc::new(MemoryChannel::default_channel("sqm")));
        assert_eq!(router.restricted_channel_ids(), vec!["ai".to_string()]);
    }

    #[tokio::test]
    async fn test_flush_all_succeeds_for_memory_channels() {
        let router = ChannelRouter::new(ValidatorChain::permissive());
        router.register(Arc::new(MemoryChannel::default_channel("a")));
        assert!(router.flush_all().await.is_ok());
    }
}
