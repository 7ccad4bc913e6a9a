//! Subscriber callbacks and their kind filters.

use std::fmt;
use std::sync::Arc;

use sdai_core::event::{EventKind, ProjectEvent};

use crate::types::{ChannelError, ChannelKey};

/// Set of message kinds a handler wants to receive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b0111_1111);

    /// Exactly one kind.
    pub const fn only(kind: EventKind) -> Self {
        Self(1 << kind.bit())
    }

    /// Add a kind to the set.
    #[must_use]
    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | (1 << kind.bit()))
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & (1 << kind.bit()) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Kinds in the set, in declaration order.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl Default for Interest {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<EventKind> for Interest {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

/// A subscriber registered on a channel.
///
/// Handlers run synchronously on the channel's reader task, one message at a
/// time, so they should return quickly and hand heavy work off elsewhere.
pub trait EventHandler: Send + Sync {
    /// Kinds this handler accepts. Read once, at registration.
    fn interest(&self) -> Interest {
        Interest::ALL
    }

    /// Called for every message whose kind is in [`interest`](Self::interest).
    fn on_event(&self, channel: &ChannelKey, event: &ProjectEvent);

    /// Called when the channel's connection fails.
    fn on_error(&self, _error: &ChannelError) {}

    /// Called each time the channel's connection (re)opens.
    fn on_open(&self, _channel: &ChannelKey) {}
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Closure-backed handler, see [`handler_fn`].
pub struct FnHandler<F> {
    interest: Interest,
    callback: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&ChannelKey, &ProjectEvent) + Send + Sync,
{
    fn interest(&self) -> Interest {
        self.interest
    }

    fn on_event(&self, channel: &ChannelKey, event: &ProjectEvent) {
        (self.callback)(channel, event);
    }
}

/// Wrap a closure as a shared handler.
pub fn handler_fn<F>(interest: Interest, callback: F) -> SharedHandler
where
    F: Fn(&ChannelKey, &ProjectEvent) + Send + Sync + 'static,
{
    Arc::new(FnHandler { interest, callback })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_membership() {
        let interest = Interest::only(EventKind::File).with(EventKind::Task);
        assert!(interest.contains(EventKind::File));
        assert!(interest.contains(EventKind::Task));
        assert!(!interest.contains(EventKind::Data));
        assert_eq!(
            interest.kinds().collect::<Vec<_>>(),
            vec![EventKind::Task, EventKind::File]
        );
    }

    #[test]
    fn all_covers_every_kind() {
        for kind in EventKind::ALL {
            assert!(Interest::ALL.contains(kind));
            assert!(!Interest::NONE.contains(kind));
        }
        assert_eq!(EventKind::ALL.into_iter().collect::<Interest>(), Interest::ALL);
    }

    #[test]
    fn debug_lists_kinds() {
        let interest = Interest::only(EventKind::Data);
        assert_eq!(format!("{interest:?}"), "{Data}");
    }
}
