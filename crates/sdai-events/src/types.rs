//! Event bus types.

use std::fmt;
use std::time::Duration;

use sdai_core::config::BusSettings;

use crate::reconnect::ReconnectPolicy;

/// Configuration for the event bus.
#[derive(Debug, Clone, Default)]
pub struct BusConfig {
    /// Maximum subscribers per channel (`None` = unlimited).
    pub max_subscribers: Option<usize>,
    /// Reconnection policy applied to every channel.
    pub reconnect: ReconnectPolicy,
}

impl From<&BusSettings> for BusConfig {
    fn from(settings: &BusSettings) -> Self {
        let reconnect = &settings.reconnect;
        Self {
            max_subscribers: (settings.max_subscribers > 0).then_some(settings.max_subscribers),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(reconnect.max_delay_ms),
                multiplier: reconnect.multiplier,
                max_attempts: Some(reconnect.max_attempts),
            },
        }
    }
}

/// Name of one logical event stream, e.g. `project.42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// Validate and wrap a channel key.
    pub fn new(key: impl Into<String>) -> Result<Self, BusError> {
        let key = key.into();
        let reason = if key.is_empty() {
            Some("empty")
        } else if key.chars().any(char::is_whitespace) {
            Some("contains whitespace")
        } else if key.contains('/') {
            Some("contains '/'")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(BusError::InvalidChannelKey {
                key,
                reason: reason.to_string(),
            }),
            None => Ok(Self(key)),
        }
    }

    /// Update feed of one project: `project.<id>`.
    pub fn project(project_id: impl fmt::Display) -> Result<Self, BusError> {
        let id = project_id.to_string();
        if id.is_empty() {
            return Err(BusError::InvalidChannelKey {
                key: id,
                reason: "empty project id".to_string(),
            });
        }
        Self::new(format!("project.{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ChannelKey {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Registration token returned for every added handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle state of a channel's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Open requested, no response yet.
    Connecting,
    /// Stream is live.
    Open,
    /// Waiting to retry after a failure (1-based attempt).
    Reconnecting { attempt: u32 },
    /// Gave up; no further updates until the channel is recreated.
    Failed,
    /// Evicted from the registry.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed => f.write_str("failed"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Snapshot of one registered channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub key: ChannelKey,
    pub url: String,
    /// Identifies the physical connection; a re-created channel gets a new one.
    pub connection_id: u64,
    pub state: ChannelState,
    pub subscribers: usize,
    /// Last SSE id seen on the stream.
    pub last_event_id: Option<String>,
    pub messages_received: u64,
    pub messages_dropped: u64,
}

/// Event bus statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Number of registered channels.
    pub channel_count: usize,
    /// Total subscriptions across all channels.
    pub total_subscribers: usize,
    /// Channels whose stream is currently live.
    pub open_connections: usize,
}

/// Error delivered to handlers when a channel's connection fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    pub channel: ChannelKey,
    pub message: String,
    /// Consecutive failures so far (1-based).
    pub attempt: u32,
    /// No reconnect will follow.
    pub terminal: bool,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}: {}", self.channel, self.message)?;
        if self.terminal {
            f.write_str(" (giving up)")
        } else {
            write!(f, " (attempt {})", self.attempt)
        }
    }
}

/// Event bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid channel key {key:?}: {reason}")]
    InvalidChannelKey { key: String, reason: String },

    #[error("Too many subscribers for channel {channel} (max: {max})")]
    TooManySubscribers { channel: ChannelKey, max: usize },

    #[error("Event bus requires a Tokio runtime: {0}")]
    NoRuntime(String),

    #[error("Event bus has been shut down")]
    ShutDown,
}
