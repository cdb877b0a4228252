use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the MCP client.
///
/// Every failure is delivered to the specific caller that is waiting on it;
/// only a failed handshake leaves the whole connection unusable.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to deliver message: {0}")]
    Send(String),

    #[error("Request {id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON-RPC error: {message} (code: {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection not ready: {0}")]
    NotReady(String),

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("No endpoint announced by the server yet")]
    NoEndpoint,

    #[error("Request id {0} is already pending")]
    DuplicateId(u64),

    #[error("Connection closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl McpError {
    /// True when the call failed because no reply arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
