//! Event and error formatting for the terminal.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use sdai_core::event::ProjectEvent;
use sdai_events::{ChannelError, ChannelKey, EventHandler, Interest};
use serde_json::json;
use tokio::sync::Notify;
use tracing::warn;

/// How events are printed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One aligned, human-readable line per event.
    Pretty,
    /// One JSON object per line: `{"channel": ..., "event": <envelope>}`.
    Json,
}

pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

pub fn write_event(
    w: &mut dyn Write,
    format: OutputFormat,
    channel: &ChannelKey,
    event: &ProjectEvent,
) -> io::Result<()> {
    match format {
        OutputFormat::Pretty => {
            write!(
                w,
                "{:<16} {:<16} {}",
                channel.as_str(),
                event.tag,
                event.object_id().unwrap_or("-")
            )?;
            if let Some(object_type) = event.object_type() {
                write!(w, " ({object_type})")?;
            }
            writeln!(w)
        }
        OutputFormat::Json => {
            let line = json!({ "channel": channel.as_str(), "event": event.to_value() });
            writeln!(w, "{line}")
        }
    }
}

pub fn write_channel_error(w: &mut dyn Write, error: &ChannelError) -> io::Result<()> {
    writeln!(w, "[Error: {error}]")
}

pub fn write_channel_open(w: &mut dyn Write, channel: &ChannelKey) -> io::Result<()> {
    writeln!(w, "[Connected: {channel}]")
}

/// Counts channels that failed for good; resolves once all of them have.
#[derive(Debug)]
pub struct FailureTracker {
    watched: usize,
    failed: Mutex<HashSet<ChannelKey>>,
    notify: Notify,
}

impl FailureTracker {
    pub fn new(watched: usize) -> Self {
        Self {
            watched,
            failed: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    pub fn record(&self, error: &ChannelError) {
        if !error.terminal {
            return;
        }
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(error.channel.clone());
        if self.all_failed() {
            self.notify.notify_one();
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn all_failed(&self) -> bool {
        self.watched > 0 && self.failed_count() >= self.watched
    }

    pub async fn wait_all_failed(&self) {
        while !self.all_failed() {
            self.notify.notified().await;
        }
    }
}

/// Handler that prints every event it receives.
pub struct PrintHandler {
    format: OutputFormat,
    interest: Interest,
    out: SharedWriter,
    err: SharedWriter,
    tracker: Arc<FailureTracker>,
}

impl PrintHandler {
    pub fn new(
        format: OutputFormat,
        interest: Interest,
        out: SharedWriter,
        err: SharedWriter,
        tracker: Arc<FailureTracker>,
    ) -> Self {
        Self {
            format,
            interest,
            out,
            err,
            tracker,
        }
    }

    /// Print events to stdout and connection notices to stderr.
    pub fn stdio(format: OutputFormat, interest: Interest, tracker: Arc<FailureTracker>) -> Self {
        Self::new(
            format,
            interest,
            Arc::new(Mutex::new(io::stdout())),
            Arc::new(Mutex::new(io::stderr())),
            tracker,
        )
    }
}

impl EventHandler for PrintHandler {
    fn interest(&self) -> Interest {
        self.interest
    }

    fn on_event(&self, channel: &ChannelKey, event: &ProjectEvent) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written =
            write_event(&mut *out, self.format, channel, event).and_then(|()| out.flush());
        if let Err(e) = written {
            warn!(error = %e, "Failed to write event");
        }
    }

    fn on_error(&self, error: &ChannelError) {
        {
            let mut err = self.err.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = write_channel_error(&mut *err, error);
        }
        self.tracker.record(error);
    }

    fn on_open(&self, channel: &ChannelKey) {
        let mut err = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = write_channel_open(&mut *err, channel);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sdai_core::event::{EventKind, Inbound, parse_data};

    fn key() -> ChannelKey {
        ChannelKey::project("42").unwrap()
    }

    fn render(format: OutputFormat, event: &ProjectEvent) -> String {
        let mut buf = Vec::new();
        write_event(&mut buf, format, &key(), event).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn channel_error(terminal: bool) -> ChannelError {
        ChannelError {
            channel: key(),
            message: "HTTP 503".into(),
            attempt: 1,
            terminal,
        }
    }

    #[test]
    fn pretty_line() {
        let event = ProjectEvent::new(
            EventKind::File,
            json!({"id": "f1", "type": "image"}),
        );
        assert_eq!(
            render(OutputFormat::Pretty, &event),
            "project.42       file             f1 (image)\n"
        );

        let bare = ProjectEvent::new(EventKind::Task, serde_json::Value::Null);
        assert_eq!(
            render(OutputFormat::Pretty, &bare),
            "project.42       task             -\n"
        );
    }

    #[test]
    fn json_line_keeps_envelope() {
        let Inbound::Event(event) =
            parse_data(r#"{"type":"render_progress","object":{"id":"r1"},"progress":40}"#).unwrap()
        else {
            unreachable!("known kind");
        };
        let line = render(OutputFormat::Json, &event);
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["channel"], "project.42");
        assert_eq!(value["event"]["type"], "render_progress");
        assert_eq!(value["event"]["progress"], 40);
    }

    #[test]
    fn error_line() {
        let mut buf = Vec::new();
        write_channel_error(&mut buf, &channel_error(true)).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "[Error: channel project.42: HTTP 503 (giving up)]\n"
        );
    }

    #[test]
    fn tracker_counts_terminal_failures_once() {
        let tracker = FailureTracker::new(2);
        tracker.record(&channel_error(false));
        assert_eq!(tracker.failed_count(), 0);

        tracker.record(&channel_error(true));
        tracker.record(&channel_error(true));
        assert_eq!(tracker.failed_count(), 1);
        assert!(!tracker.all_failed());
    }

    #[tokio::test]
    async fn tracker_wakes_when_everything_failed() {
        let tracker = Arc::new(FailureTracker::new(1));
        let waiter = tokio::spawn({
            let tracker = Arc::clone(&tracker);
            async move { tracker.wait_all_failed().await }
        });
        tracker.record(&channel_error(true));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn print_handler_writes_to_sinks() {
        let out = Arc::new(Mutex::new(Vec::<u8>::new()));
        let err = Arc::new(Mutex::new(Vec::<u8>::new()));
        let tracker = Arc::new(FailureTracker::new(1));
        let handler = PrintHandler::new(
            OutputFormat::Pretty,
            Interest::ALL,
            out.clone(),
            err.clone(),
            Arc::clone(&tracker),
        );

        handler.on_open(&key());
        handler.on_event(&key(), &ProjectEvent::new(EventKind::Data, json!({"id": "d1"})));
        handler.on_error(&channel_error(true));

        let stdout = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        let stderr = String::from_utf8(err.lock().unwrap().clone()).unwrap();
        assert!(stdout.contains("d1"));
        assert!(stderr.starts_with("[Connected: project.42]\n"));
        assert!(stderr.contains("giving up"));
        assert!(tracker.all_failed());
    }
}
