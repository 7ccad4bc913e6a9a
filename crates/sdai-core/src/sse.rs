//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers partial lines and
//! emits one [`SseFrame`] per blank-line-terminated block that carried data.

use crate::error::{Error, Result};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Longest line the decoder buffers before giving up on the stream.
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// One dispatched Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if the server named the event.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last event id in effect when the frame was dispatched.
    pub id: Option<String>,
    /// `retry:` reconnection hint in milliseconds.
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Frame carrying only data.
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attach an event id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Stateful SSE decoder. One instance per connection.
#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    max_line: usize,
    /// Previous chunk ended in `\r`; swallow a leading `\n`.
    skip_lf: bool,
    started: bool,
    data: String,
    has_data: bool,
    event: Option<String>,
    retry: Option<u64>,
    last_event_id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            line: Vec::new(),
            max_line: DEFAULT_MAX_LINE,
            skip_lf: false,
            started: false,
            data: String::new(),
            has_data: false,
            event: None,
            retry: None,
            last_event_id: None,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the line length limit (bytes, excluding the terminator).
    #[must_use]
    pub const fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Seed the last event id, e.g. when resuming a stream.
    pub fn with_last_event_id(last_event_id: Option<String>) -> Self {
        Self {
            last_event_id,
            ..Self::default()
        }
    }

    /// The id that should accompany a reconnect (`Last-Event-ID`).
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk of the body and collect every completed frame.
    ///
    /// Fails once a single line grows past the configured limit; the stream
    /// is unusable after that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        let mut frames = Vec::new();
        let mut bytes = chunk;

        if !self.started {
            self.line.extend_from_slice(bytes);
            if self.line.len() < BOM.len() && BOM.starts_with(&self.line) {
                return Ok(frames);
            }
            self.started = true;
            let buffered = std::mem::take(&mut self.line);
            let buffered = buffered.strip_prefix(BOM).unwrap_or(&buffered).to_vec();
            self.scan(&buffered, &mut frames)?;
            return Ok(frames);
        }

        if self.skip_lf {
            self.skip_lf = false;
            if let Some(rest) = bytes.strip_prefix(b"\n") {
                bytes = rest;
            }
        }
        self.scan(bytes, &mut frames)?;
        Ok(frames)
    }

    fn scan(&mut self, mut bytes: &[u8], frames: &mut Vec<SseFrame>) -> Result<()> {
        while let Some(pos) = bytes.iter().position(|b| *b == b'\n' || *b == b'\r') {
            self.check_line(pos)?;
            self.line.extend_from_slice(&bytes[..pos]);
            let line = std::mem::take(&mut self.line);
            self.process_line(&line, frames);

            let terminator = bytes[pos];
            bytes = &bytes[pos + 1..];
            if terminator == b'\r' {
                if bytes.is_empty() {
                    self.skip_lf = true;
                } else if bytes[0] == b'\n' {
                    bytes = &bytes[1..];
                }
            }
        }
        self.check_line(bytes.len())?;
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn check_line(&mut self, incoming: usize) -> Result<()> {
        if self.line.len() + incoming > self.max_line {
            self.line.clear();
            return Err(Error::LineTooLong {
                limit: self.max_line,
            });
        }
        Ok(())
    }

    fn process_line(&mut self, line: &[u8], frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            if let Some(frame) = self.dispatch() {
                frames.push(frame);
            }
            return;
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => {
                self.last_event_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let retry = self.retry.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
            retry,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"type\":\"task\"}\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("{\"type\":\"task\"}")]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: upd").unwrap().is_empty());
        assert!(decoder.feed(b"ate\ndata: hel").unwrap().is_empty());
        let frames = decoder.feed(b"lo\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("update"));
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: a\ndata: b\ndata\n\n").unwrap();
        assert_eq!(frames[0].data, "a\nb\n");
    }

    #[test]
    fn crlf_and_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: one\r\n\r\ndata: two\r\r").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data, "two");

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: x\r").unwrap().is_empty());
        let frames = decoder.feed(b"\n\r\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("x")]);
    }

    #[test]
    fn comments_and_empty_frames_are_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keep-alive\n\nevent: ping\n\ndata: x\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn id_persists_between_frames() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"id: 7\ndata: a\n\ndata: b\n\n").unwrap();
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[1].id.as_deref(), Some("7"));
        assert_eq!(decoder.last_event_id(), Some("7"));

        decoder.feed(b"id\ndata: c\n\n").unwrap();
        assert_eq!(decoder.last_event_id(), None);
    }

    #[test]
    fn retry_must_be_digits() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"retry: 1500\ndata: a\n\nretry: soon\ndata: b\n\n").unwrap();
        assert_eq!(frames[0].retry, Some(1500));
        assert_eq!(frames[1].retry, None);
    }

    #[test]
    fn leading_bom_is_stripped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\xEF\xBB").unwrap().is_empty());
        let frames = decoder.feed(b"\xBFdata: a\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("a")]);
    }

    #[test]
    fn resumed_decoder_keeps_seeded_id() {
        let mut decoder = SseDecoder::with_last_event_id(Some("41".into()));
        let frames = decoder.feed(b"data: a\n\n").unwrap();
        assert_eq!(frames[0].id.as_deref(), Some("41"));
    }

    #[test]
    fn overlong_line_is_an_error() {
        let mut decoder = SseDecoder::new().with_max_line(16);
        assert!(decoder.feed(b"data: 0123456789").is_ok());
        assert!(matches!(
            decoder.feed(b"abcdef"),
            Err(Error::LineTooLong { limit: 16 })
        ));

        let mut decoder = SseDecoder::new().with_max_line(16);
        assert!(decoder.feed(b"data: far too long for the limit\n\n").is_err());
    }

    #[test]
    fn line_at_the_limit_is_accepted() {
        let mut decoder = SseDecoder::new().with_max_line(7);
        let frames = decoder.feed(b"data: a\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("a")]);
    }
}
