//! `SuperDuperAI` event bus
//!
//! Multiplexes project event streams onto handlers:
//! - One connection per channel key, shared by every subscriber
//! - Fan-out in registration order with per-handler panic isolation
//! - Connection closed when the last subscriber leaves
//! - Optional reconnect with `Last-Event-ID` resume
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdai_events::{ChannelKey, EventBus, HttpConnector, Interest, handler_fn};
//! use sdai_core::{EventKind, config::ServerConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ServerConfig::default();
//! let connector = Arc::new(HttpConnector::new(&server)?);
//! let bus = EventBus::new(Default::default(), server, connector)?;
//!
//! let files = handler_fn(Interest::only(EventKind::File), |_, event| {
//!     tracing::info!(id = ?event.object_id(), "file updated");
//! });
//! let _guard = bus.subscribe(&ChannelKey::project("42")?, files)?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod bus;
mod channel;
pub mod connector;
pub mod dispatch;
pub mod handler;
pub mod reconnect;
mod sync;
pub mod types;

pub use binding::ChannelBinding;
pub use bus::{EventBus, SubscriptionGuard};
pub use connector::{
    ConnectError, ConnectRequest, Connector, ConnectorEvent, FrameStream, HttpConnector,
    MemoryConnector,
};
pub use dispatch::DispatchReport;
pub use handler::{EventHandler, FnHandler, Interest, SharedHandler, handler_fn};
pub use reconnect::{ReconnectPolicy, Reconnector, RetryDecision};
pub use types::{
    BusConfig, BusError, BusStats, ChannelError, ChannelInfo, ChannelKey, ChannelState,
    SubscriptionId,
};
