//! relay - MCP client for servers speaking the SSE transport
//!
//! This is the convenience wrapper crate that re-exports `relay-core`.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! relay = "0.1"
//! ```

// Re-export core
pub use relay_core::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use relay_core::mcp::{CallToolResult, McpError, ServerInfo, ToolDescriptor};
    pub use relay_core::{Config, ConnectionState, McpClient};
}
