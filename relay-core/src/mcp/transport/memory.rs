//! In-process transport.
//!
//! [`pair`] returns a [`MemoryTransport`] for the client and a [`MemoryPeer`]
//! that plays the server: it injects stream events and observes every
//! outbound message. Used by the test suite and by embedders that host an
//! MCP server in the same process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use super::{Transport, TransportEvent, EVENT_BUFFER};
use crate::mcp::error::{McpError, Result};

/// A message the client delivered, as seen by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Url,
    pub body: Value,
}

impl Outbound {
    pub fn id(&self) -> Option<u64> {
        self.body.get("id").and_then(Value::as_u64)
    }

    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Value> {
        self.body.get("params")
    }
}

#[derive(Debug, Default)]
struct Switches {
    reject_sends: AtomicBool,
    closed: AtomicBool,
}

/// Client half of an in-process connection.
#[derive(Debug)]
pub struct MemoryTransport {
    url: Url,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    switches: Arc<Switches>,
}

/// Server half of an in-process connection.
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    switches: Arc<Switches>,
}

/// Create a connected transport/peer pair. `url` plays the role of the
/// subscription URL.
pub fn pair(url: Url) -> (MemoryTransport, MemoryPeer) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let switches = Arc::new(Switches::default());

    let transport = MemoryTransport {
        url,
        events: Mutex::new(Some(event_rx)),
        outbound: outbound_tx,
        switches: Arc::clone(&switches),
    };
    let peer = MemoryPeer {
        events: event_tx,
        outbound: outbound_rx,
        switches,
    };

    (transport, peer)
}

#[async_trait]
impl Transport for MemoryTransport {
    fn url(&self) -> &Url {
        &self.url
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| McpError::Transport("memory transport lock poisoned".to_string()))?;
        events
            .take()
            .ok_or_else(|| McpError::Transport("event stream already subscribed".to_string()))
    }

    async fn send(&self, target: &Url, payload: String) -> Result<()> {
        if self.switches.reject_sends.load(Ordering::SeqCst) {
            return Err(McpError::Send(format!("{} rejected the message", target)));
        }
        let body: Value = serde_json::from_str(&payload)?;
        self.outbound
            .send(Outbound {
                target: target.clone(),
                body,
            })
            .map_err(|_| McpError::Send("peer is gone".to_string()))
    }

    fn close(&self) {
        self.switches.closed.store(true, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Push a raw event. False once the client stopped listening.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn open(&self) -> bool {
        self.emit(TransportEvent::Open).await
    }

    pub async fn announce_endpoint(&self, endpoint: &str) -> bool {
        self.emit(TransportEvent::Endpoint(endpoint.to_string())).await
    }

    pub async fn fail(&self, error: &str) -> bool {
        self.emit(TransportEvent::Error(error.to_string())).await
    }

    /// Push a JSON payload as a `message` event.
    pub async fn push(&self, message: &Value) -> bool {
        self.emit(TransportEvent::Message(message.to_string())).await
    }

    /// Reply to request `id` with `result`.
    pub async fn reply(&self, id: u64, result: Value) -> bool {
        self.push(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await
    }

    /// Reply to request `id` with a JSON-RPC error object.
    pub async fn reply_error(&self, id: u64, code: i64, message: &str) -> bool {
        self.push(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }))
        .await
    }

    /// Next message the client sent, waiting for it if necessary.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next message the client sent, if one is already queued.
    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Make every subsequent client send fail (or succeed again).
    pub fn reject_sends(&self, reject: bool) {
        self.switches.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// True once the client closed the transport.
    pub fn is_closed(&self) -> bool {
        self.switches.closed.load(Ordering::SeqCst)
    }

    /// Drive the server side of the handshake: open the stream, announce
    /// `endpoint`, answer `initialize` with `server_info`, and consume the
    /// `notifications/initialized` that follows. Returns the initialize
    /// request as sent by the client.
    pub async fn complete_handshake(&mut self, endpoint: &str, server_info: Value) -> Option<Outbound> {
        self.open().await;
        self.announce_endpoint(endpoint).await;

        let initialize = self.next_outbound().await?;
        let id = initialize.id()?;
        self.reply(
            id,
            json!({
                "protocolVersion": crate::mcp::types::PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": server_info,
            }),
        )
        .await;

        let initialized = self.next_outbound().await?;
        debug_assert_eq!(initialized.method(), Some("notifications/initialized"));
        Some(initialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://host/sse").unwrap()
    }

    #[tokio::test]
    async fn test_events_flow_in_order() {
        let (transport, peer) = pair(url());
        let mut events = transport.subscribe().unwrap();

        peer.open().await;
        peer.announce_endpoint("/messages").await;

        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Endpoint("/messages".to_string()))
        );
    }

    #[tokio::test]
    async fn test_subscribe_once() {
        let (transport, _peer) = pair(url());
        let _events = transport.subscribe().unwrap();
        assert!(matches!(transport.subscribe(), Err(McpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (transport, mut peer) = pair(url());
        let target = Url::parse("http://host/messages").unwrap();

        transport
            .send(&target, r#"{"jsonrpc":"2.0","method":"tools/list","id":3}"#.to_string())
            .await
            .unwrap();

        let outbound = peer.next_outbound().await.unwrap();
        assert_eq!(outbound.target, target);
        assert_eq!(outbound.id(), Some(3));
        assert_eq!(outbound.method(), Some("tools/list"));
    }

    #[tokio::test]
    async fn test_rejected_send_is_an_error() {
        let (transport, mut peer) = pair(url());
        peer.reject_sends(true);

        let outcome = transport.send(&url(), "{}".to_string()).await;
        assert!(matches!(outcome, Err(McpError::Send(_))));
        assert!(peer.try_next_outbound().is_none());
    }
}
