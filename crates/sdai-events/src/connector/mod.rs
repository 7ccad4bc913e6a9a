//! Connection establishment for channels.
//!
//! A [`Connector`] turns a channel URL into a lazily evaluated stream of
//! connection events. Dropping the stream closes the connection.

mod http;
mod memory;

use std::pin::Pin;

use sdai_core::sse::SseFrame;
use tokio_stream::Stream;

use crate::types::ChannelKey;

pub use http::HttpConnector;
pub use memory::MemoryConnector;

/// Stream of one physical connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<ConnectorEvent, ConnectError>> + Send>>;

/// Item yielded by a connection stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// The server accepted the stream.
    Opened,
    /// One decoded server-sent event.
    Frame(SseFrame),
}

/// Parameters for opening one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub channel: ChannelKey,
    pub url: String,
    /// Resume point sent as `Last-Event-ID` on reconnects.
    pub last_event_id: Option<String>,
}

/// Connection failures. Reported to subscribers, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream ended by server")]
    Ended,

    #[error("connector configuration error: {0}")]
    Config(String),
}

/// Opens connections. Implementations must not block; failures are
/// reported through the returned stream.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: ConnectRequest) -> FrameStream;
}
