//! Transport implementations for MCP
//!
//! The client only ever sees two capabilities: a stream of inbound events
//! and a way to deliver an outbound payload to a URL.

pub mod memory;
pub mod sse;

pub use memory::{MemoryPeer, MemoryTransport, Outbound};
pub use sse::{SseDecoder, SseTransport};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::error::Result;

/// Capacity of the inbound event channel.
pub const EVENT_BUFFER: usize = 64;

/// One inbound event from the server-to-client stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream is open.
    Open,
    /// The stream failed.
    Error(String),
    /// The server announced where to POST messages (relative or absolute).
    Endpoint(String),
    /// A raw JSON-RPC payload.
    Message(String),
}

/// Half-duplex transport: events in, POSTs out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The subscription URL. Endpoint announcements are resolved against it.
    fn url(&self) -> &Url;

    /// Start the inbound event stream.
    ///
    /// Events are delivered in arrival order to the single returned receiver.
    /// Must be called from within a tokio runtime; a transport can only be
    /// subscribed once.
    fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Deliver one outbound payload to `target`.
    async fn send(&self, target: &Url, payload: String) -> Result<()>;

    /// Stop the inbound event stream. Safe to call more than once.
    fn close(&self);
}
