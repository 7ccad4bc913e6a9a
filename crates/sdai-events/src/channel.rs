//! Per-channel state and the reader task that drives one connection.

use std::sync::{Arc, Mutex};

use sdai_core::event::{Inbound, parse_data};
use sdai_core::sse::SseFrame;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

use crate::connector::{ConnectError, ConnectRequest, Connector, ConnectorEvent, FrameStream};
use crate::dispatch::{Subscriber, dispatch_error, dispatch_event, dispatch_open};
use crate::reconnect::{ReconnectPolicy, Reconnector, RetryDecision};
use crate::sync::lock;
use crate::types::{ChannelError, ChannelInfo, ChannelKey, ChannelState, SubscriptionId};

/// State shared between the registry and the channel's reader task.
pub(crate) struct ChannelShared {
    pub key: ChannelKey,
    pub url: String,
    pub connection_id: u64,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    status: Mutex<ChannelStatus>,
}

struct ChannelStatus {
    state: ChannelState,
    last_event_id: Option<String>,
    received: u64,
    dropped: u64,
}

impl ChannelShared {
    pub fn new(key: ChannelKey, url: String, connection_id: u64) -> Self {
        Self {
            key,
            url,
            connection_id,
            subscribers: Mutex::new(Vec::new()),
            status: Mutex::new(ChannelStatus {
                state: ChannelState::Connecting,
                last_event_id: None,
                received: 0,
                dropped: 0,
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Current subscribers, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        lock(&self.subscribers).clone()
    }

    pub fn add(&self, subscribers: impl IntoIterator<Item = Arc<Subscriber>>) {
        lock(&self.subscribers).extend(subscribers);
    }

    /// Remove and deactivate the given subscriptions.
    /// Returns `(removed, remaining)`.
    pub fn remove(&self, ids: &[SubscriptionId]) -> (usize, usize) {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|sub| {
            if ids.contains(&sub.id) {
                sub.deactivate();
                false
            } else {
                true
            }
        });
        (before - subscribers.len(), subscribers.len())
    }

    /// Detach every subscriber, still active, so a fresh connection can
    /// take them over.
    pub fn take_subscribers(&self) -> Vec<Arc<Subscriber>> {
        std::mem::take(&mut *lock(&self.subscribers))
    }

    /// Deactivate everything; used on eviction.
    pub fn clear(&self) {
        for sub in lock(&self.subscribers).drain(..) {
            sub.deactivate();
        }
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.status).state
    }

    pub fn set_state(&self, state: ChannelState) {
        lock(&self.status).state = state;
    }

    pub fn last_event_id(&self) -> Option<String> {
        lock(&self.status).last_event_id.clone()
    }

    pub fn info(&self) -> ChannelInfo {
        let subscribers = self.subscriber_count();
        let status = lock(&self.status);
        ChannelInfo {
            key: self.key.clone(),
            url: self.url.clone(),
            connection_id: self.connection_id,
            state: status.state,
            subscribers,
            last_event_id: status.last_event_id.clone(),
            messages_received: status.received,
            messages_dropped: status.dropped,
        }
    }

    fn handle_frame(&self, frame: SseFrame) {
        {
            let mut status = lock(&self.status);
            status.received += 1;
            if frame.id.is_some() {
                status.last_event_id.clone_from(&frame.id);
            }
        }

        match parse_data(&frame.data) {
            Ok(Inbound::Event(event)) => {
                let subscribers = self.snapshot();
                let report = dispatch_event(&self.key, &subscribers, &event);
                trace!(
                    channel = %self.key,
                    kind = %event.kind,
                    delivered = report.delivered,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Event dispatched"
                );
            }
            Ok(Inbound::Unrecognized { tag, .. }) => {
                lock(&self.status).dropped += 1;
                debug!(channel = %self.key, tag, "Dropping message of unknown kind");
            }
            Err(e) => {
                lock(&self.status).dropped += 1;
                debug!(channel = %self.key, error = %e, "Dropping malformed message");
            }
        }
    }
}

/// A registered channel: shared state plus the task owning its connection.
pub(crate) struct ChannelEntry {
    pub shared: Arc<ChannelShared>,
    task: JoinHandle<()>,
}

impl ChannelEntry {
    pub const fn new(shared: Arc<ChannelShared>, task: JoinHandle<()>) -> Self {
        Self { shared, task }
    }

    /// Close the connection and stop all delivery.
    pub fn close(self) {
        self.shared.clear();
        self.shared.set_state(ChannelState::Closed);
        self.task.abort();
        info!(
            channel = %self.shared.key,
            connection_id = self.shared.connection_id,
            "Channel closed"
        );
    }
}

/// Drive one channel's connection until it gives up or is aborted.
pub(crate) async fn run_channel(
    shared: Arc<ChannelShared>,
    connector: Arc<dyn Connector>,
    mut stream: FrameStream,
    policy: ReconnectPolicy,
) {
    let mut reconnector = Reconnector::new(policy);

    loop {
        let failure = drive(&shared, &mut stream, &mut reconnector).await;
        drop(stream);

        let decision = reconnector.on_failure();
        let terminal = matches!(decision, RetryDecision::GiveUp { .. });
        let error = ChannelError {
            channel: shared.key.clone(),
            message: failure.to_string(),
            attempt: reconnector.failures(),
            terminal,
        };

        shared.set_state(match decision {
            RetryDecision::Retry { attempt, .. } => ChannelState::Reconnecting { attempt },
            RetryDecision::GiveUp { .. } => ChannelState::Failed,
        });
        dispatch_error(&shared.snapshot(), &error);

        match decision {
            RetryDecision::GiveUp { failures } => {
                warn!(
                    channel = %shared.key,
                    error = %failure,
                    failures,
                    "Channel connection failed; no further updates"
                );
                return;
            }
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    channel = %shared.key,
                    error = %failure,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnecting channel"
                );
                sleep(delay).await;
                stream = connector.open(ConnectRequest {
                    channel: shared.key.clone(),
                    url: shared.url.clone(),
                    last_event_id: shared.last_event_id(),
                });
                shared.set_state(ChannelState::Connecting);
            }
        }
    }
}

/// Read one connection to its end. Returns why it ended.
async fn drive(
    shared: &ChannelShared,
    stream: &mut FrameStream,
    reconnector: &mut Reconnector,
) -> ConnectError {
    while let Some(item) = stream.next().await {
        match item {
            Ok(ConnectorEvent::Opened) => {
                reconnector.on_open();
                shared.set_state(ChannelState::Open);
                debug!(channel = %shared.key, "Channel open");
                dispatch_open(&shared.key, &shared.snapshot());
            }
            Ok(ConnectorEvent::Frame(frame)) => shared.handle_frame(frame),
            Err(e) => return e,
        }
    }
    ConnectError::Ended
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handler::{Interest, handler_fn};

    #[test]
    fn remove_reports_remaining_and_deactivates() {
        let shared = ChannelShared::new(
            ChannelKey::project("1").unwrap(),
            "memory://project.1".into(),
            1,
        );
        let a = Arc::new(Subscriber::new(
            SubscriptionId(1),
            handler_fn(Interest::ALL, |_, _| {}),
        ));
        let b = Arc::new(Subscriber::new(
            SubscriptionId(2),
            handler_fn(Interest::ALL, |_, _| {}),
        ));
        shared.add([Arc::clone(&a), Arc::clone(&b)]);

        assert_eq!(shared.remove(&[SubscriptionId(1), SubscriptionId(9)]), (1, 1));
        assert!(!a.is_active());
        assert!(b.is_active());

        shared.clear();
        assert!(!b.is_active());
        assert_eq!(shared.subscriber_count(), 0);
    }

    #[test]
    fn frames_update_counters_and_last_id() {
        let shared = ChannelShared::new(
            ChannelKey::project("1").unwrap(),
            "memory://project.1".into(),
            1,
        );
        shared.handle_frame(SseFrame::data(r#"{"type":"file","object":{}}"#).with_id("5"));
        shared.handle_frame(SseFrame::data(r#"{"type":"ping"}"#));
        shared.handle_frame(SseFrame::data("garbage"));

        let info = shared.info();
        assert_eq!(info.messages_received, 3);
        assert_eq!(info.messages_dropped, 2);
        assert_eq!(info.last_event_id.as_deref(), Some("5"));
    }
}
