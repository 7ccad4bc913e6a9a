//! Fan-out of inbound messages to a channel's subscribers.
//!
//! Handlers are invoked in registration order on the caller's task. A
//! panicking handler is isolated so the rest of the list still receives the
//! message.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sdai_core::event::ProjectEvent;
use tracing::warn;

use crate::handler::{Interest, SharedHandler};
use crate::types::{ChannelError, ChannelKey, SubscriptionId};

/// One registered handler.
pub(crate) struct Subscriber {
    pub id: SubscriptionId,
    pub handler: SharedHandler,
    pub interest: Interest,
    pub registered_at: Instant,
    active: AtomicBool,
}

impl Subscriber {
    pub fn new(id: SubscriptionId, handler: SharedHandler) -> Self {
        Self {
            id,
            interest: handler.interest(),
            handler,
            registered_at: Instant::now(),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery, including to a fan-out already in progress.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("interest", &self.interest)
            .field("registered_at", &self.registered_at)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Outcome of fanning out one message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that received the message.
    pub delivered: usize,
    /// Handlers skipped by their interest filter or already removed.
    pub skipped: usize,
    /// Handlers that panicked.
    pub failed: usize,
}

/// Deliver `event` to every active subscriber interested in its kind.
pub(crate) fn dispatch_event(
    channel: &ChannelKey,
    subscribers: &[Arc<Subscriber>],
    event: &ProjectEvent,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for subscriber in subscribers {
        if !subscriber.is_active() || !subscriber.interest.contains(event.kind) {
            report.skipped += 1;
            continue;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            subscriber.handler.on_event(channel, event);
        }));
        match outcome {
            Ok(()) => report.delivered += 1,
            Err(payload) => {
                report.failed += 1;
                warn!(
                    channel = %channel,
                    subscription = %subscriber.id,
                    kind = %event.kind,
                    panic = panic_message(payload.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }

    report
}

/// Report a connection failure to every active subscriber.
pub(crate) fn dispatch_error(subscribers: &[Arc<Subscriber>], error: &ChannelError) {
    for subscriber in subscribers.iter().filter(|s| s.is_active()) {
        let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handler.on_error(error)));
        if let Err(payload) = outcome {
            warn!(
                channel = %error.channel,
                subscription = %subscriber.id,
                panic = panic_message(payload.as_ref()),
                "Error handler panicked"
            );
        }
    }
}

/// Tell every active subscriber the connection is live.
pub(crate) fn dispatch_open(channel: &ChannelKey, subscribers: &[Arc<Subscriber>]) {
    for subscriber in subscribers.iter().filter(|s| s.is_active()) {
        let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handler.on_open(channel)));
        if let Err(payload) = outcome {
            warn!(
                channel = %channel,
                subscription = %subscriber.id,
                panic = panic_message(payload.as_ref()),
                "Open handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sdai_core::event::EventKind;
    use serde_json::json;

    use crate::handler::{EventHandler, handler_fn};

    fn key() -> ChannelKey {
        ChannelKey::project("123").unwrap()
    }

    fn recorder(interest: Interest) -> (SharedHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = handler_fn(interest, move |_, event| {
            sink.lock()
                .unwrap()
                .push(event.object_id().unwrap_or_default().to_string());
        });
        (handler, seen)
    }

    fn subscriber(id: u64, handler: SharedHandler) -> Arc<Subscriber> {
        Arc::new(Subscriber::new(SubscriptionId(id), handler))
    }

    #[test]
    fn filters_by_interest() {
        let (files, file_seen) = recorder(Interest::only(EventKind::File));
        let (all, all_seen) = recorder(Interest::ALL);
        let subs = vec![subscriber(1, files), subscriber(2, all)];

        let event = ProjectEvent::new(EventKind::Task, json!({"id": "t1"}));
        let report = dispatch_event(&key(), &subs, &event);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert!(file_seen.lock().unwrap().is_empty());
        assert_eq!(*all_seen.lock().unwrap(), vec!["t1".to_string()]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let boom = handler_fn(Interest::ALL, |_, _| panic!("boom"));
        let (after, seen) = recorder(Interest::ALL);
        let subs = vec![subscriber(1, boom), subscriber(2, after)];

        let event = ProjectEvent::new(EventKind::Data, json!({"id": "f1"}));
        let report = dispatch_event(&key(), &subs, &event);

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["f1".to_string()]);
    }

    #[test]
    fn inactive_subscribers_are_skipped() {
        let (handler, seen) = recorder(Interest::ALL);
        let sub = subscriber(1, handler);
        sub.deactivate();

        let event = ProjectEvent::new(EventKind::Data, json!({"id": "f1"}));
        let report = dispatch_event(&key(), &[sub], &event);
        assert_eq!(report.skipped, 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn removal_during_fan_out_takes_effect_immediately() {
        let (second, seen) = recorder(Interest::ALL);
        let second = subscriber(2, second);
        let victim = Arc::clone(&second);
        let first = handler_fn(Interest::ALL, move |_, _| victim.deactivate());
        let subs = vec![subscriber(1, first), second];

        let event = ProjectEvent::new(EventKind::Data, json!({"id": "f1"}));
        dispatch_event(&key(), &subs, &event);
        assert!(seen.lock().unwrap().is_empty());
    }

    struct ErrorRecorder(Mutex<Vec<ChannelError>>);

    impl EventHandler for ErrorRecorder {
        fn on_event(&self, _: &ChannelKey, _: &ProjectEvent) {}
        fn on_error(&self, error: &ChannelError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    #[test]
    fn errors_reach_every_active_subscriber() {
        let a = Arc::new(ErrorRecorder(Mutex::new(Vec::new())));
        let b = Arc::new(ErrorRecorder(Mutex::new(Vec::new())));
        let subs = vec![subscriber(1, a.clone()), subscriber(2, b.clone())];

        let error = ChannelError {
            channel: key(),
            message: "refused".into(),
            attempt: 1,
            terminal: true,
        };
        dispatch_error(&subs, &error);
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap()[0], error);
    }
}
