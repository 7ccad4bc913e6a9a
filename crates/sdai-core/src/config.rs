//! Configuration resolution for `SuperDuperAI` event consumers.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/superduperai/events.json)
//! 3. Project config (.superduperai/events.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Backend origin, e.g. `https://editor.superduperai.co`.
    pub base_url: String,
    /// Path prefix of the event endpoints; the channel key is appended.
    pub events_path: String,
    /// Bearer token sent with every stream request.
    pub token: Option<String>,
    /// TCP/TLS connect timeout (seconds). The stream itself has none.
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://editor.superduperai.co".to_string(),
            events_path: "/api/v1/events".to_string(),
            token: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Stream URL for a channel key.
    pub fn channel_url(&self, channel_key: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.events_path.trim_matches('/');
        if path.is_empty() {
            format!("{base}/{channel_key}")
        } else {
            format!("{base}/{path}/{channel_key}")
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BusSettings {
    /// Maximum subscribers per channel (0 = unlimited).
    pub max_subscribers: usize,
    pub reconnect: ReconnectSettings,
}

/// Reconnect backoff settings. `max_attempts = 0` disables reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let global = global_config_path();
    let mut config = load_config_files(global.as_deref(), project_dir)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve defaults, global file and project file, without the environment.
pub fn load_config_files(global_path: Option<&Path>, project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_path
        && global_path.exists()
    {
        let global = load_config_file(global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    Ok(config)
}

/// Project-level config file inside `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".superduperai").join("events.json")
}

/// Global config file, e.g. `~/.config/superduperai/events.json` on Linux.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("superduperai").join("events.json"))
}

/// One config file as written: every field optional, so a file only
/// overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    server: ServerLayer,
    bus: BusLayer,
    logging: LoggingLayer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerLayer {
    base_url: Option<String>,
    events_path: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BusLayer {
    max_subscribers: Option<usize>,
    reconnect: ReconnectLayer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconnectLayer {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingLayer {
    level: Option<String>,
    json: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let layer = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(layer)
}

fn merge_config(base: &mut Config, overlay: ConfigLayer) {
    fn set<T>(target: &mut T, value: Option<T>) {
        if let Some(value) = value {
            *target = value;
        }
    }

    let ConfigLayer {
        server,
        bus,
        logging,
    } = overlay;

    set(&mut base.server.base_url, server.base_url);
    set(&mut base.server.events_path, server.events_path);
    if server.token.is_some() {
        base.server.token = server.token;
    }
    set(
        &mut base.server.connect_timeout_secs,
        server.connect_timeout_secs,
    );

    set(&mut base.bus.max_subscribers, bus.max_subscribers);
    let reconnect = &mut base.bus.reconnect;
    set(&mut reconnect.max_attempts, bus.reconnect.max_attempts);
    set(&mut reconnect.initial_delay_ms, bus.reconnect.initial_delay_ms);
    set(&mut reconnect.max_delay_ms, bus.reconnect.max_delay_ms);
    set(&mut reconnect.multiplier, bus.reconnect.multiplier);

    set(&mut base.logging.level, logging.level);
    set(&mut base.logging.json, logging.json);
}

/// Apply `SDAI_*` overrides. `lookup` abstracts the environment for tests.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("SDAI_BASE_URL") {
        config.server.base_url = val;
    }
    if let Some(val) = lookup("SDAI_EVENTS_PATH") {
        config.server.events_path = val;
    }
    if let Some(val) = lookup("SDAI_TOKEN")
        && !val.is_empty()
    {
        config.server.token = Some(val);
    }
    if let Some(val) = lookup("SDAI_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("SDAI_RECONNECT_ATTEMPTS")
        && let Ok(n) = val.parse()
    {
        config.bus.reconnect.max_attempts = n;
    }
}
