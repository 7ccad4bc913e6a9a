//! Server-sent-events connector over HTTP.
//!
//! Issues `GET <url>` with `Accept: text/event-stream` and decodes the body
//! incrementally.

use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue};
use sdai_core::config::ServerConfig;
use sdai_core::sse::{SseDecoder, SseFrame};
use tokio_stream::StreamExt;
use tracing::debug;

use super::{ConnectError, ConnectRequest, Connector, ConnectorEvent, FrameStream};

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Production connector backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    token: Option<String>,
}

impl HttpConnector {
    /// Build a connector from the server section of the configuration.
    pub fn new(config: &ServerConfig) -> Result<Self, ConnectError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(token) = &config.token
            && HeaderValue::from_str(&format!("Bearer {token}")).is_err()
        {
            return Err(ConnectError::Config("Invalid token format".into()));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ConnectError::Config(e.to_string()))?;

        Ok(Self {
            http,
            token: config.token.clone(),
        })
    }

    /// Check HTTP response status, returning error for non-success codes.
    fn check_status(resp: &reqwest::Response) -> Result<(), ConnectError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ConnectError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }
}

/// Decode one body chunk; an oversized line fails the stream.
fn decode_chunk(decoder: &mut SseDecoder, bytes: &[u8]) -> Result<Vec<SseFrame>, ConnectError> {
    decoder
        .feed(bytes)
        .map_err(|e| ConnectError::Stream(e.to_string()))
}

impl Connector for HttpConnector {
    fn open(&self, request: ConnectRequest) -> FrameStream {
        let http = self.http.clone();
        let token = self.token.clone();

        Box::pin(async_stream::stream! {
            let mut req = http.get(&request.url);
            if let Some(token) = &token {
                req = req.bearer_auth(token);
            }
            if let Some(id) = &request.last_event_id {
                req = req.header(LAST_EVENT_ID, id);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(ConnectError::Request(e.to_string()));
                    return;
                }
            };
            if let Err(e) = Self::check_status(&resp) {
                yield Err(e);
                return;
            }

            debug!(channel = %request.channel, url = %request.url, "Event stream opened");
            yield Ok(ConnectorEvent::Opened);

            let mut decoder = SseDecoder::with_last_event_id(request.last_event_id.clone());
            let mut body = std::pin::pin!(resp.bytes_stream());
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => match decode_chunk(&mut decoder, &bytes) {
                        Ok(frames) => {
                            for frame in frames {
                                yield Ok(ConnectorEvent::Frame(frame));
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Err(e) => {
                        yield Err(ConnectError::Stream(e.to_string()));
                        return;
                    }
                }
            }
            yield Err(ConnectError::Ended);
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_token_with_control_characters() {
        let config = ServerConfig {
            token: Some("bad\ntoken".into()),
            ..ServerConfig::default()
        };
        assert!(matches!(
            HttpConnector::new(&config),
            Err(ConnectError::Config(_))
        ));
    }

    #[test]
    fn oversized_line_fails_the_stream() {
        let mut decoder = SseDecoder::new().with_max_line(8);
        let frames = decode_chunk(&mut decoder, b"data: a\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::data("a")]);

        let err = decode_chunk(&mut decoder, b"data: no terminator in sight").unwrap_err();
        assert!(matches!(err, ConnectError::Stream(msg) if msg.contains("longer than 8 bytes")));
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_as_request_error() {
        let config = ServerConfig {
            // Port 9 (discard) on localhost is closed in test environments.
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 2,
            ..ServerConfig::default()
        };
        let connector = HttpConnector::new(&config).unwrap();
        let mut stream = connector.open(ConnectRequest {
            channel: crate::ChannelKey::project("1").unwrap(),
            url: config.channel_url("project.1"),
            last_event_id: None,
        });

        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ConnectError::Request(_))));
        assert!(stream.next().await.is_none());
    }
}
