//! sdai-watch
//!
//! Terminal watcher for `SuperDuperAI` project event streams.

pub mod output;

use sdai_core::Config;
use sdai_core::event::EventKind;
use sdai_events::{BusError, ChannelKey, Interest};

/// Command-line values that take precedence over the loaded configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub reconnect_attempts: Option<u32>,
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(base_url) = self.base_url {
            config.server.base_url = base_url;
        }
        if let Some(token) = self.token {
            config.server.token = Some(token);
        }
        if let Some(attempts) = self.reconnect_attempts {
            config.bus.reconnect.max_attempts = attempts;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

/// Channels to watch: project channels first, then raw keys, without duplicates.
pub fn channel_keys(projects: &[String], channels: &[String]) -> Result<Vec<ChannelKey>, BusError> {
    let mut keys: Vec<ChannelKey> = Vec::with_capacity(projects.len() + channels.len());
    let candidates = projects
        .iter()
        .map(ChannelKey::project)
        .chain(channels.iter().map(|c| ChannelKey::new(c.as_str())));
    for key in candidates {
        let key = key?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Kind filter from `--kind` flags; no flags means every kind.
pub fn interest_for(kinds: &[EventKind]) -> Interest {
    if kinds.is_empty() {
        Interest::ALL
    } else {
        kinds.iter().copied().collect()
    }
}
