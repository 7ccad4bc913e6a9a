//! sdai-watch
//!
//! Subscribes to `SuperDuperAI` project channels and prints every pushed
//! event until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use sdai_core::config::load_config;
use sdai_core::event::EventKind;
use sdai_core::tracing_init::{default_filter, init_tracing};
use sdai_events::{BusConfig, EventBus, HttpConnector, SharedHandler};
use sdai_watch::output::{FailureTracker, OutputFormat, PrintHandler};
use sdai_watch::{Overrides, channel_keys, interest_for};

#[derive(Parser, Debug)]
#[command(name = "sdai-watch")]
#[command(version, about = "Watch SuperDuperAI project event streams")]
struct Args {
    /// Project id to watch (repeatable)
    #[arg(short, long = "project", value_name = "ID")]
    projects: Vec<String>,

    /// Raw channel key to watch, e.g. "project.42" (repeatable)
    #[arg(short, long = "channel", value_name = "KEY")]
    channels: Vec<String>,

    /// Only print these kinds (repeatable, e.g. "file", "render_progress")
    #[arg(short, long = "kind", value_name = "KIND")]
    kinds: Vec<EventKind>,

    /// Backend origin
    #[arg(long, env = "SDAI_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the event endpoints
    #[arg(long, env = "SDAI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Reconnect attempts after a dropped connection (0 disables reconnecting)
    #[arg(long, env = "SDAI_RECONNECT_ATTEMPTS")]
    reconnect_attempts: Option<u32>,

    /// Output format for events on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    /// Log level for sdai crates (overridden by RUST_LOG)
    #[arg(long, env = "SDAI_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Directory whose .superduperai/events.json is loaded (default: current directory)
    #[arg(long)]
    project_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = args
        .project_dir
        .clone()
        .or_else(|| std::env::current_dir().ok());
    let mut config = load_config(project_dir.as_deref()).context("Failed to load configuration")?;
    Overrides {
        base_url: args.base_url,
        token: args.token,
        reconnect_attempts: args.reconnect_attempts,
        log_level: args.log_level,
        log_json: args.log_json,
    }
    .apply(&mut config);

    init_tracing(
        &default_filter("sdai_watch", &config.logging.level),
        config.logging.json,
    );

    let keys = channel_keys(&args.projects, &args.channels)?;
    if keys.is_empty() {
        anyhow::bail!("Nothing to watch: pass --project or --channel");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.server.base_url,
        channels = keys.len(),
        "Starting sdai-watch"
    );

    let connector = Arc::new(HttpConnector::new(&config.server)?);
    let bus = EventBus::new(BusConfig::from(&config.bus), config.server.clone(), connector)?;

    let tracker = Arc::new(FailureTracker::new(keys.len()));
    let handler: SharedHandler = Arc::new(PrintHandler::stdio(
        args.format,
        interest_for(&args.kinds),
        Arc::clone(&tracker),
    ));

    let mut guards = Vec::with_capacity(keys.len());
    for key in &keys {
        guards.push(bus.subscribe(key, Arc::clone(&handler))?);
    }

    let outcome = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down");
            Ok(())
        }
        () = tracker.wait_all_failed() => {
            error!(channels = keys.len(), "Every channel failed");
            Err(anyhow::anyhow!("All {} channel(s) failed", keys.len()))
        }
    };

    drop(guards);
    bus.shutdown();
    outcome
}
