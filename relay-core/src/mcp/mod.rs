//! MCP (Model Context Protocol) client over Server-Sent Events
//!
//! Server-to-client messages arrive on a one-way event stream, client-to-server
//! messages are POSTed to an endpoint the server announces on that stream.
//! This module reconciles the two channels into a request/response API:
//!
//! - `registry`: pending calls keyed by request id
//! - `transport`: the event stream and outbound delivery (SSE, in-memory)
//! - `handshake`: endpoint announcement and the `initialize` exchange
//! - `lifecycle`: connection state and the wait-until-ready primitive
//! - `client`: the public [`McpClient`]

pub mod client;
mod driver;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::{McpError, Result};
pub use handshake::resolve_endpoint;
pub use lifecycle::ConnectionState;
pub use registry::PendingCalls;
pub use transport::{Transport, TransportEvent};
pub use types::{
    CallToolResult, ClientInfo, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ServerInfo, ToolDescriptor,
};
