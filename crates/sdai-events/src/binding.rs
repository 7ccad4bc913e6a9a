//! Subscriber lifecycle bound to a changing channel identifier.
//!
//! A view that follows "the current project" holds a [`ChannelBinding`] and
//! calls [`bind`](ChannelBinding::bind) whenever the identifier changes. The
//! handler set is unsubscribed from the old channel before it is subscribed
//! to the new one; binding the same key again does nothing.

use tracing::debug;

use crate::bus::{EventBus, SubscriptionGuard};
use crate::handler::SharedHandler;
use crate::types::{BusError, ChannelKey};

/// A fixed handler set attached to at most one channel at a time.
///
/// Dropping the binding unsubscribes it.
pub struct ChannelBinding {
    bus: EventBus,
    handlers: Vec<SharedHandler>,
    current: Option<SubscriptionGuard>,
}

impl ChannelBinding {
    pub const fn new(bus: EventBus, handlers: Vec<SharedHandler>) -> Self {
        Self {
            bus,
            handlers,
            current: None,
        }
    }

    /// Attach to `key`, leaving the previous channel first.
    ///
    /// If subscribing to `key` fails the binding is left unbound.
    pub fn bind(&mut self, key: &ChannelKey) -> Result<(), BusError> {
        if self.channel() == Some(key) {
            return Ok(());
        }

        if let Some(previous) = self.current.take() {
            debug!(from = %previous.channel(), to = %key, "Rebinding handlers");
            drop(previous);
        }

        self.current = Some(self.bus.subscribe_all(key, self.handlers.clone())?);
        Ok(())
    }

    /// Attach to the channel of a project id.
    pub fn bind_project(&mut self, project_id: &str) -> Result<(), BusError> {
        let key = ChannelKey::project(project_id)?;
        self.bind(&key)
    }

    /// Detach from the current channel, if any.
    pub fn unbind(&mut self) {
        self.current = None;
    }

    pub fn channel(&self) -> Option<&ChannelKey> {
        self.current.as_ref().map(SubscriptionGuard::channel)
    }

    pub const fn is_bound(&self) -> bool {
        self.current.is_some()
    }
}

impl EventBus {
    /// Create an unbound [`ChannelBinding`] for `handlers`.
    pub fn binding(&self, handlers: Vec<SharedHandler>) -> ChannelBinding {
        ChannelBinding::new(self.clone(), handlers)
    }
}

impl std::fmt::Debug for ChannelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("handlers", &self.handlers.len())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connector::MemoryConnector;
    use crate::handler::{Interest, handler_fn};

    fn setup() -> (MemoryConnector, EventBus) {
        let connector = MemoryConnector::new();
        let bus = EventBus::with_defaults(Arc::new(connector.clone())).unwrap();
        (connector, bus)
    }

    #[tokio::test]
    async fn rebinding_moves_handlers() {
        let (connector, bus) = setup();
        let mut binding = bus.binding(vec![handler_fn(Interest::ALL, |_, _| {})]);
        assert!(!binding.is_bound());

        binding.bind_project("1").unwrap();
        let one = ChannelKey::project("1").unwrap();
        assert_eq!(binding.channel(), Some(&one));
        assert_eq!(connector.open_count(&one), 1);

        binding.bind_project("2").unwrap();
        let two = ChannelKey::project("2").unwrap();
        assert!(bus.channel_info(&one).is_none());
        assert_eq!(bus.channel_info(&two).unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn same_key_is_a_no_op() {
        let (connector, bus) = setup();
        let mut binding = bus.binding(vec![handler_fn(Interest::ALL, |_, _| {})]);
        let key = ChannelKey::project("1").unwrap();

        binding.bind(&key).unwrap();
        let before = bus.channel_info(&key).unwrap();
        binding.bind(&key).unwrap();
        let after = bus.channel_info(&key).unwrap();

        assert_eq!(before.connection_id, after.connection_id);
        assert_eq!(after.subscribers, 1);
        assert_eq!(connector.open_count(&key), 1);
    }

    #[tokio::test]
    async fn unbind_and_drop_release_the_channel() {
        let (_connector, bus) = setup();
        let mut binding = bus.binding(vec![handler_fn(Interest::ALL, |_, _| {})]);
        binding.bind_project("1").unwrap();
        binding.unbind();
        assert_eq!(bus.stats().channel_count, 0);

        binding.bind_project("1").unwrap();
        drop(binding);
        assert_eq!(bus.stats().channel_count, 0);
    }

    #[tokio::test]
    async fn invalid_project_keeps_current_binding() {
        let (_connector, bus) = setup();
        let mut binding = bus.binding(vec![handler_fn(Interest::ALL, |_, _| {})]);
        binding.bind_project("1").unwrap();
        assert!(binding.bind_project("").is_err());
        assert!(binding.is_bound());
        assert!(binding.bind_project("a/b").is_err());
    }
}
