//! relay-core - MCP client over a half-duplex SSE transport
//!
//! Provides the pieces needed to talk to an MCP server that streams its
//! messages over Server-Sent Events and accepts client messages as HTTP POSTs:
//! - Connection handshake and lifecycle
//! - Request/response correlation with per-call timeouts
//! - SSE and in-memory transports
//! - Configuration management
//!
//! ## Primary API
//!
//! Users should interact with the server via [`McpClient`].

// Public modules
pub mod config;
pub mod mcp;

// Public exports
pub use config::{Config, ConfigError};

// MCP exports
pub use mcp::{
    CallToolResult, ConnectionState, McpClient, McpError, ServerInfo, ToolDescriptor, Transport,
    TransportEvent,
};
