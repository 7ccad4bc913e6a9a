//! In-process connector.
//!
//! Frames published by the host are delivered to every live connection of
//! the channel as if the server had sent them. Opens and closes are counted
//! per channel, which makes it the connection double in tests.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use sdai_core::sse::SseFrame;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::{ConnectError, ConnectRequest, Connector, ConnectorEvent, FrameStream};
use crate::sync::lock;
use crate::types::ChannelKey;

type Item = Result<ConnectorEvent, ConnectError>;

/// Connector whose server side is driven by the host process.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_link: u64,
    links: HashMap<ChannelKey, Vec<Link>>,
    opens: HashMap<ChannelKey, usize>,
    closes: HashMap<ChannelKey, usize>,
    refusals: HashMap<ChannelKey, VecDeque<ConnectError>>,
    requests: Vec<ConnectRequest>,
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Item>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a data-only frame. Returns the number of live connections reached.
    pub fn publish(&self, channel: &ChannelKey, data: impl Into<String>) -> usize {
        self.publish_frame(channel, SseFrame::data(data))
    }

    /// Publish a JSON envelope.
    pub fn publish_json(&self, channel: &ChannelKey, envelope: &serde_json::Value) -> usize {
        self.publish(channel, envelope.to_string())
    }

    /// Publish a complete frame (with id, event name, ...).
    pub fn publish_frame(&self, channel: &ChannelKey, frame: SseFrame) -> usize {
        self.send(channel, || Ok(ConnectorEvent::Frame(frame.clone())))
    }

    /// Fail every live connection of the channel with a stream error.
    pub fn fail(&self, channel: &ChannelKey, message: impl Into<String>) -> usize {
        let message = message.into();
        self.send(channel, || Err(ConnectError::Stream(message.clone())))
    }

    /// Make the next open of `channel` fail with `error`.
    pub fn refuse_next(&self, channel: &ChannelKey, error: ConnectError) {
        lock(&self.state)
            .refusals
            .entry(channel.clone())
            .or_default()
            .push_back(error);
    }

    /// Number of `open` calls made for the channel.
    pub fn open_count(&self, channel: &ChannelKey) -> usize {
        lock(&self.state).opens.get(channel).copied().unwrap_or(0)
    }

    /// Number of connection streams dropped for the channel.
    pub fn close_count(&self, channel: &ChannelKey) -> usize {
        lock(&self.state).closes.get(channel).copied().unwrap_or(0)
    }

    /// Connections currently alive for the channel.
    pub fn live_count(&self, channel: &ChannelKey) -> usize {
        lock(&self.state)
            .links
            .get(channel)
            .map_or(0, |links| links.iter().filter(|l| !l.tx.is_closed()).count())
    }

    /// Every open request made for the channel, oldest first.
    pub fn requests(&self, channel: &ChannelKey) -> Vec<ConnectRequest> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| &r.channel == channel)
            .cloned()
            .collect()
    }

    fn send(&self, channel: &ChannelKey, mut item: impl FnMut() -> Item) -> usize {
        let mut state = lock(&self.state);
        let Some(links) = state.links.get_mut(channel) else {
            return 0;
        };
        links.retain(|link| !link.tx.is_closed());
        links
            .iter()
            .filter(|link| link.tx.send(item()).is_ok())
            .count()
    }
}

impl Connector for MemoryConnector {
    fn open(&self, request: ConnectRequest) -> FrameStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = request.channel.clone();

        let mut state = lock(&self.state);
        *state.opens.entry(channel.clone()).or_default() += 1;
        state.requests.push(request);

        let refusal = state
            .refusals
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);

        state.next_link += 1;
        let id = state.next_link;
        if let Some(error) = refusal {
            let _ = tx.send(Err(error));
        } else {
            let _ = tx.send(Ok(ConnectorEvent::Opened));
            state
                .links
                .entry(channel.clone())
                .or_default()
                .push(Link { id, tx });
        }
        drop(state);

        Box::pin(MemoryStream {
            channel,
            link: id,
            rx,
            state: Arc::downgrade(&self.state),
        })
    }
}

struct MemoryStream {
    channel: ChannelKey,
    link: u64,
    rx: mpsc::UnboundedReceiver<Item>,
    state: Weak<Mutex<MemoryState>>,
}

impl Stream for MemoryStream {
    type Item = Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        if let Some(links) = state.links.get_mut(&self.channel) {
            links.retain(|link| link.id != self.link);
        }
        *state.closes.entry(self.channel.clone()).or_default() += 1;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn request(key: &ChannelKey) -> ConnectRequest {
        ConnectRequest {
            channel: key.clone(),
            url: format!("memory://{key}"),
            last_event_id: None,
        }
    }

    #[tokio::test]
    async fn open_publish_and_close() {
        let connector = MemoryConnector::new();
        let key = ChannelKey::project("1").unwrap();

        let mut stream = connector.open(request(&key));
        assert_eq!(connector.open_count(&key), 1);
        assert_eq!(connector.publish(&key, "hello"), 1);

        assert_eq!(stream.next().await.unwrap(), Ok(ConnectorEvent::Opened));
        assert_eq!(
            stream.next().await.unwrap(),
            Ok(ConnectorEvent::Frame(SseFrame::data("hello")))
        );

        drop(stream);
        assert_eq!(connector.close_count(&key), 1);
        assert_eq!(connector.live_count(&key), 0);
        assert_eq!(connector.publish(&key, "lost"), 0);
    }

    #[tokio::test]
    async fn refused_open_yields_error_then_ends() {
        let connector = MemoryConnector::new();
        let key = ChannelKey::project("2").unwrap();
        connector.refuse_next(
            &key,
            ConnectError::Status {
                status: 503,
                message: "Service Unavailable".into(),
            },
        );

        let mut stream = connector.open(request(&key));
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(ConnectError::Status { status: 503, .. })
        ));
        assert!(stream.next().await.is_none());
        assert_eq!(connector.live_count(&key), 0);
    }

    #[tokio::test]
    async fn fail_reaches_live_connections() {
        let connector = MemoryConnector::new();
        let key = ChannelKey::project("3").unwrap();
        let mut stream = connector.open(request(&key));
        assert_eq!(connector.fail(&key, "reset"), 1);

        stream.next().await.unwrap().unwrap();
        assert_eq!(
            stream.next().await.unwrap(),
            Err(ConnectError::Stream("reset".into()))
        );
    }
}
