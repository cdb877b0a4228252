//! SSE transport for MCP
//!
//! Server-to-client messages arrive on a long-lived `GET` answered with
//! `text/event-stream`; client-to-server messages are POSTed to the endpoint
//! the server announces on that stream.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{Transport, TransportEvent, EVENT_BUFFER};
use crate::config::{ConfigError, ServerConfig};
use crate::mcp::error::{McpError, Result};

/// Longest SSE line accepted before the stream is treated as broken.
const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// SSE transport over `reqwest`.
#[derive(Debug)]
pub struct SseTransport {
    url: Url,
    http_client: reqwest::Client,
    headers: HeaderMap,
    shutdown: CancellationToken,
    subscribed: AtomicBool,
}

impl SseTransport {
    /// Create a transport for the given subscription URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            http_client: reqwest::Client::new(),
            headers: HeaderMap::new(),
            shutdown: CancellationToken::new(),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Build a transport from the `server` section of the configuration.
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        let url = server.parsed_url()?;
        let mut headers = HeaderMap::new();
        for (name, value) in &server.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::Invalid(format!("header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::Invalid(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(Self::new(url).with_headers(headers))
    }

    /// Extra headers sent with the subscription and with every POST.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn url(&self) -> &Url {
        &self.url
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(McpError::Transport(
                "event stream already subscribed".to_string(),
            ));
        }

        let request = self
            .http_client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let shutdown = self.shutdown.clone();
        let unsubscribed = sender.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => debug!("event stream cancelled"),
                _ = unsubscribed.closed() => debug!("event stream receiver dropped"),
                _ = pump(request, sender) => {}
            }
        });

        Ok(receiver)
    }

    async fn send(&self, target: &Url, payload: String) -> Result<()> {
        let response = self
            .http_client
            .post(target.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| McpError::Send(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Send(format!("{} returned {}: {}", target, status, body)));
        }

        Ok(())
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Read the event stream until it ends, forwarding decoded events.
async fn pump(request: reqwest::RequestBuilder, events: mpsc::Sender<TransportEvent>) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = events
            .send(TransportEvent::Error(format!("event stream returned {}", status)))
            .await;
        return;
    }

    if events.send(TransportEvent::Open).await.is_err() {
        return;
    }

    let body = response
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    forward(StreamReader::new(body), &events).await;
}

/// Decode a `text/event-stream` body and forward its events.
///
/// Ends with an `Error` event once the body is exhausted or unreadable.
async fn forward<R: AsyncRead>(body: R, events: &mpsc::Sender<TransportEvent>) {
    let lines = FramedRead::new(body, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    tokio::pin!(lines);
    let mut decoder = SseDecoder::default();

    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                if let Some(event) = decoder.feed(&line) {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "event stream read failed");
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        }
    }

    let _ = events
        .send(TransportEvent::Error("event stream ended".to_string()))
        .await;
}

/// Incremental decoder for `text/event-stream` lines.
///
/// Feed it one line at a time (without the line terminator); a blank line
/// dispatches the buffered event. Only `endpoint` and `message` events are
/// surfaced; other event names are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, line: &str) -> Option<TransportEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<TransportEvent> {
        let name = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");

        match name.as_deref() {
            None | Some("") | Some("message") => Some(TransportEvent::Message(data)),
            Some("endpoint") => Some(TransportEvent::Endpoint(data)),
            Some(other) => {
                debug!(event = other, "skipping unhandled event type");
                None
            }
        }
    }
}
