//! Channel registry with connection de-duplication and fan-out.
//!
//! The bus opens at most one connection per channel key, no matter how many
//! handlers subscribe to it. The connection is closed and the channel evicted
//! as soon as its last subscriber leaves. All registry mutations happen under
//! one short, synchronous lock that is never held while handlers run, so they
//! are safe to call from handlers and from `Drop`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use sdai_core::config::ServerConfig;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::channel::{ChannelEntry, ChannelShared, run_channel};
use crate::connector::{ConnectRequest, Connector};
use crate::dispatch::Subscriber;
use crate::handler::SharedHandler;
use crate::sync::lock;
use crate::types::{
    BusConfig, BusError, BusStats, ChannelInfo, ChannelKey, ChannelState, SubscriptionId,
};

/// Process-wide event bus. Cheap to clone; clones share the registry.
///
/// Construct one at the application root and hand clones to consumers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

pub(crate) struct BusInner {
    config: BusConfig,
    server: ServerConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
    next_subscription: AtomicU64,
    next_connection: AtomicU64,
    shut_down: AtomicBool,
}

impl EventBus {
    /// Create a bus on the current Tokio runtime.
    pub fn new(
        config: BusConfig,
        server: ServerConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, BusError> {
        let runtime = Handle::try_current().map_err(|e| BusError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(config, server, connector, runtime))
    }

    /// Create a bus whose reader tasks run on `runtime`.
    pub fn with_runtime(
        config: BusConfig,
        server: ServerConfig,
        connector: Arc<dyn Connector>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                server,
                connector,
                runtime,
                channels: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                next_connection: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(connector: Arc<dyn Connector>) -> Result<Self, BusError> {
        Self::new(BusConfig::default(), ServerConfig::default(), connector)
    }

    /// Stream URL of a channel under the configured server.
    pub fn url_for(&self, key: &ChannelKey) -> String {
        self.inner.server.channel_url(key.as_str())
    }

    /// Return the channel's connection, opening it at `url` if the channel is
    /// not registered yet or its connection has failed for good. Never fails
    /// synchronously: connection errors reach subscribers through
    /// [`EventHandler::on_error`](crate::EventHandler::on_error).
    ///
    /// A channel created here with no subscribers is evicted by the next
    /// [`remove_subscribers`](Self::remove_subscribers) call that leaves it
    /// empty, or by [`shutdown`](Self::shutdown).
    pub fn ensure_connection(&self, key: &ChannelKey, url: &str) -> Result<ChannelInfo, BusError> {
        self.inner.ensure_open()?;
        let mut channels = lock(&self.inner.channels);
        let entry = self.inner.get_or_open(&mut channels, key, url, Vec::new());
        Ok(entry.shared.info())
    }

    /// Append `handlers`, in order, to the channel's subscriber list, opening
    /// the channel's connection if needed. Returns one token per handler.
    pub fn add_subscribers(
        &self,
        key: &ChannelKey,
        handlers: Vec<SharedHandler>,
    ) -> Result<Vec<SubscriptionId>, BusError> {
        let url = self.url_for(key);
        self.add_subscribers_at(key, &url, handlers)
    }

    /// Like [`add_subscribers`](Self::add_subscribers) with an explicit URL
    /// used only if the channel has to be opened.
    pub fn add_subscribers_at(
        &self,
        key: &ChannelKey,
        url: &str,
        handlers: Vec<SharedHandler>,
    ) -> Result<Vec<SubscriptionId>, BusError> {
        self.inner.ensure_open()?;
        if handlers.is_empty() {
            return Ok(Vec::new());
        }

        let mut channels = lock(&self.inner.channels);

        if let Some(max) = self.inner.config.max_subscribers {
            let existing = channels
                .get(key)
                .map_or(0, |entry| entry.shared.subscriber_count());
            if existing + handlers.len() > max {
                return Err(BusError::TooManySubscribers {
                    channel: key.clone(),
                    max,
                });
            }
        }

        let subscribers: Vec<Arc<Subscriber>> = handlers
            .into_iter()
            .map(|handler| {
                let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
                Arc::new(Subscriber::new(id, handler))
            })
            .collect();
        let ids: Vec<SubscriptionId> = subscribers.iter().map(|s| s.id).collect();

        let entry = self.inner.get_or_open(&mut channels, key, url, subscribers);
        let total = entry.shared.subscriber_count();
        drop(channels);

        debug!(channel = %key, added = ids.len(), total, "Subscribers added");
        Ok(ids)
    }

    /// Remove subscriptions. Closes and evicts the channel when none remain,
    /// even if none of `ids` were registered on it.
    /// Returns how many of `ids` were registered on the channel.
    pub fn remove_subscribers(&self, key: &ChannelKey, ids: &[SubscriptionId]) -> usize {
        self.inner.remove(key, ids)
    }

    /// Subscribe one handler for the lifetime of the returned guard.
    pub fn subscribe(
        &self,
        key: &ChannelKey,
        handler: SharedHandler,
    ) -> Result<SubscriptionGuard, BusError> {
        self.subscribe_all(key, vec![handler])
    }

    /// Subscribe a handler set for the lifetime of the returned guard.
    pub fn subscribe_all(
        &self,
        key: &ChannelKey,
        handlers: Vec<SharedHandler>,
    ) -> Result<SubscriptionGuard, BusError> {
        let ids = self.add_subscribers(key, handlers)?;
        Ok(SubscriptionGuard {
            bus: Arc::downgrade(&self.inner),
            channel: key.clone(),
            ids,
        })
    }

    /// Snapshot of one channel.
    pub fn channel_info(&self, key: &ChannelKey) -> Option<ChannelInfo> {
        lock(&self.inner.channels)
            .get(key)
            .map(|entry| entry.shared.info())
    }

    /// Snapshot of every registered channel, ordered by key.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = lock(&self.inner.channels)
            .values()
            .map(|entry| entry.shared.info())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Get bus statistics.
    pub fn stats(&self) -> BusStats {
        let channels = lock(&self.inner.channels);
        BusStats {
            channel_count: channels.len(),
            total_subscribers: channels
                .values()
                .map(|entry| entry.shared.subscriber_count())
                .sum(),
            open_connections: channels
                .values()
                .filter(|entry| entry.shared.state() == ChannelState::Open)
                .count(),
        }
    }

    /// Close every channel and refuse new subscriptions.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let closed = self.inner.close_all();
        info!(channels = closed, "Event bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl BusInner {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(BusError::ShutDown);
        }
        Ok(())
    }

    fn get_or_open<'a>(
        &self,
        channels: &'a mut HashMap<ChannelKey, ChannelEntry>,
        key: &ChannelKey,
        url: &str,
        subscribers: Vec<Arc<Subscriber>>,
    ) -> &'a mut ChannelEntry {
        match channels.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().shared.state() == ChannelState::Failed {
                    let stale = &slot.get().shared;
                    let url = stale.url.clone();
                    let mut carried = stale.take_subscribers();
                    info!(
                        channel = %key,
                        connection_id = stale.connection_id,
                        carried = carried.len(),
                        "Reopening failed channel"
                    );
                    carried.extend(subscribers);
                    let fresh = self.open_channel(key, &url, carried);
                    slot.insert(fresh).close();
                } else {
                    slot.get().shared.add(subscribers);
                }
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(self.open_channel(key, url, subscribers)),
        }
    }

    /// Open a fresh connection. The connector is called synchronously so the
    /// connection exists before the caller returns; reading happens on a task.
    /// Initial subscribers are registered before the task starts.
    fn open_channel(
        &self,
        key: &ChannelKey,
        url: &str,
        subscribers: Vec<Arc<Subscriber>>,
    ) -> ChannelEntry {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ChannelShared::new(key.clone(), url.to_string(), connection_id));
        shared.add(subscribers);

        let stream = self.connector.open(ConnectRequest {
            channel: key.clone(),
            url: url.to_string(),
            last_event_id: None,
        });
        let task = self.runtime.spawn(run_channel(
            Arc::clone(&shared),
            Arc::clone(&self.connector),
            stream,
            self.config.reconnect.clone(),
        ));

        info!(channel = %key, url, connection_id, "Channel opened");
        ChannelEntry::new(shared, task)
    }

    fn remove(&self, key: &ChannelKey, ids: &[SubscriptionId]) -> usize {
        let mut channels = lock(&self.channels);
        let Some(entry) = channels.get(key) else {
            return 0;
        };

        let (removed, remaining) = entry.shared.remove(ids);
        debug!(channel = %key, removed, remaining, "Subscribers removed");

        if remaining == 0
            && let Some(entry) = channels.remove(key)
        {
            entry.close();
        }
        removed
    }

    fn close_all(&self) -> usize {
        let drained: Vec<ChannelEntry> = lock(&self.channels).drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.close();
        }
        count
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Keeps subscriptions alive; dropping it unsubscribes them.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    bus: Weak<BusInner>,
    channel: ChannelKey,
    ids: Vec<SubscriptionId>,
}

impl SubscriptionGuard {
    pub const fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    pub fn ids(&self) -> &[SubscriptionId] {
        &self.ids
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the subscriptions registered and hand back their tokens; they must
    /// then be removed with [`EventBus::remove_subscribers`].
    pub fn detach(mut self) -> Vec<SubscriptionId> {
        std::mem::take(&mut self.ids)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.channel, &self.ids);
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("channel", &self.channel)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}
