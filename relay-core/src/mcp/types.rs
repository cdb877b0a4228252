//! MCP (Model Context Protocol) types
//!
//! This module contains types for JSON-RPC 2.0 messages and the MCP payloads
//! the client exchanges during the handshake and tool calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{McpError, Result};

/// JSON-RPC protocol version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced in `initialize` unless configured otherwise.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Progress token attached to `tools/list` and `tools/call` requests.
pub const PROGRESS_TOKEN: u64 = 1;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcRequest {
    /// Request with ID (expects response)
    Request {
        #[serde(default = "jsonrpc_version")]
        jsonrpc: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
        id: u64,
    },
    /// Notification without ID (no response expected)
    Notification {
        #[serde(default = "jsonrpc_version")]
        jsonrpc: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
}

impl JsonRpcRequest {
    /// Create a new request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcRequest::Request {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a new notification
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcRequest::Notification {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }

    /// Get the method name
    pub fn method(&self) -> &str {
        match self {
            JsonRpcRequest::Request { method, .. } => method,
            JsonRpcRequest::Notification { method, .. } => method,
        }
    }

    /// Identifier of a request, `None` for notifications.
    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcRequest::Request { id, .. } => Some(*id),
            JsonRpcRequest::Notification { .. } => None,
        }
    }
}

/// JSON-RPC 2.0 response
///
/// Servers are lenient about the envelope, so every field is optional on the
/// way in; `id` is `Null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Value::from(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Value::from(id),
            result: None,
            error: Some(error),
        }
    }

    /// The reply identifier, if it is a non-negative integer.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }

    /// Unwraps the `result` member, turning an `error` member into
    /// [`McpError::Rpc`]. A reply carrying neither yields `Null`.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 message (can be request, notification, or response)
///
/// Anything carrying a `method` is server-initiated; everything else is
/// treated as a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

/// Name and version of one side of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Describes this client in `initialize`.
pub type ClientInfo = Implementation;

/// Describes the server, taken from the `initialize` reply.
pub type ServerInfo = Implementation;

/// Capabilities advertised by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default)]
    pub sampling: serde_json::Map<String, Value>,
    pub roots: RootsCapability,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            sampling: serde_json::Map::new(),
            roots: RootsCapability { list_changed: true },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    pub list_changed: bool,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn new(protocol_version: impl Into<String>, client_info: ClientInfo) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// The `result` of a successful `initialize` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// `_meta` block attached to tool requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub progress_token: u64,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            progress_token: PROGRESS_TOKEN,
        }
    }
}

/// Parameters of `tools/list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsParams {
    #[serde(rename = "_meta")]
    pub meta: RequestMeta,
}

/// A tool exposed by the server, as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolDescriptor {
    /// Required argument names, from the top-level `required` list or the
    /// input schema's own `required` array.
    pub fn required_arguments(&self) -> Vec<String> {
        if let Some(required) = &self.required {
            return required.clone();
        }
        self.input_schema
            .as_ref()
            .and_then(|schema| schema.get("required"))
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The `result` of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
    #[serde(rename = "_meta")]
    pub meta: RequestMeta,
}

impl CallToolParams {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            meta: RequestMeta::default(),
        }
    }
}

/// The `result` of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}
