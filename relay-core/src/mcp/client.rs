//! MCP Client
//!
//! Request/response API on top of a half-duplex transport. Replies arrive on
//! the event stream and are matched to callers by request id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use super::driver;
use super::error::{McpError, Result};
use super::lifecycle::{ConnectionState, Lifecycle};
use super::registry::PendingCalls;
use super::transport::{SseTransport, Transport};
use super::types::{
    CallToolParams, CallToolResult, ClientInfo, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsParams, ListToolsResult, ServerInfo, ToolDescriptor,
};
use crate::config::Config;

/// Upper bound on any single wait, whatever the configured timeout.
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// State shared by the client handle, the event driver and the handshake.
pub(crate) struct Connection {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: Config,
    pub(crate) registry: Mutex<PendingCalls>,
    pub(crate) lifecycle: Lifecycle,
    /// Where outbound messages go; set once from the endpoint announcement.
    pub(crate) endpoint: OnceLock<Url>,
    pub(crate) initialized: OnceLock<InitializeResult>,
    next_id: AtomicU64,
}

impl Connection {
    fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            registry: Mutex::new(PendingCalls::new()),
            lifecycle: Lifecycle::new(),
            endpoint: OnceLock::new(),
            initialized: OnceLock::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Deliver one envelope.
    ///
    /// With `expects_reply`, a fresh id is attached and the call waits for
    /// the matching reply or the request timeout, which also bounds the send.
    /// Otherwise the envelope goes out as a notification and `None` is
    /// returned once the send completes.
    pub(crate) async fn send_message(
        &self,
        method: &str,
        params: Option<Value>,
        expects_reply: bool,
    ) -> Result<Option<JsonRpcResponse>> {
        if self.lifecycle.state() == ConnectionState::Closed {
            return Err(McpError::Closed);
        }
        let target = self.endpoint.get().cloned().ok_or(McpError::NoEndpoint)?;
        let timeout = self.config.timeouts.request();

        if !expects_reply {
            let payload = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
            debug!(%method, "sending notification");
            tokio::time::timeout(timeout, self.transport.send(&target, payload))
                .await
                .map_err(|_| {
                    McpError::Send(format!("{} not delivered within {:?}", method, timeout))
                })??;
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let deadline = Instant::now() + timeout.min(MAX_WAIT);

        let (continuation, mut reply) = oneshot::channel();
        self.registry.lock().await.register(id, continuation)?;

        // close() flips the state before draining the registry
        if self.lifecycle.state() == ConnectionState::Closed {
            self.registry.lock().await.cancel(id);
            return Err(McpError::Closed);
        }

        // the deadline covers delivery as well as the reply
        debug!(id, %method, "sending request");
        let delivery = self.transport.send(&target, payload);
        let waited = match tokio::time::timeout_at(deadline, delivery).await {
            Ok(Err(e)) => {
                self.registry.lock().await.cancel(id);
                return Err(e);
            }
            Ok(Ok(())) => tokio::time::timeout_at(deadline, &mut reply).await,
            Err(elapsed) => Err(elapsed),
        };

        let outcome = match waited {
            Ok(outcome) => outcome,
            Err(_) => {
                if self.registry.lock().await.expire(id, timeout) {
                    debug!(id, %method, "request timed out");
                }
                reply.await
            }
        };

        outcome.map_err(|_| McpError::Closed)?.map(Some)
    }

    /// Send a request and unwrap its `result`.
    pub(crate) async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let response = self
            .send_message(method, params, true)
            .await?
            .ok_or_else(|| McpError::Protocol(format!("no reply to {}", method)))?;
        response.into_result()
    }

    /// Send a notification.
    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send_message(method, params, false).await.map(|_| ())
    }
}

/// MCP Client
///
/// Subscribes to the server's event stream on construction, performs the
/// `initialize` handshake as soon as the server announces its endpoint, and
/// then serves tool calls. Clones of the underlying connection are shared
/// with a background task, so the client must be created inside a tokio
/// runtime.
///
/// # Examples
///
/// ```no_run
/// use relay_core::{Config, McpClient};
///
/// # async fn example() -> relay_core::mcp::Result<()> {
/// let client = McpClient::connect(Config::new("http://127.0.0.1:8881/sse"))?;
/// client.wait_for_ready().await?;
///
/// for tool in client.get_methods().await? {
///     println!("{}", tool.name);
/// }
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    connection: Arc<Connection>,
    driver: AbortHandle,
}

impl McpClient {
    /// Connect to the SSE endpoint named in `config`.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = SseTransport::from_config(&config.server)?;
        Self::with_transport(Arc::new(transport), config)
    }

    /// Run the client over any transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: Config) -> Result<Self> {
        let events = transport.subscribe()?;
        let connection = Arc::new(Connection::new(transport, config));

        info!(url = %connection.transport.url(), "connecting to MCP server");
        let driver = tokio::spawn(driver::run(Arc::clone(&connection), events)).abort_handle();

        Ok(Self { connection, driver })
    }

    /// Wait until the handshake has completed.
    ///
    /// Bounded by the configured ready timeout.
    pub async fn wait_for_ready(&self) -> Result<()> {
        self.connection
            .lifecycle
            .wait_for_ready(self.connection.config.timeouts.ready())
            .await
    }

    /// List the tools the server exposes (`tools/list`).
    pub async fn get_methods(&self) -> Result<Vec<ToolDescriptor>> {
        self.wait_for_ready().await?;

        let params = serde_json::to_value(ListToolsParams::default())?;
        let result = self.connection.request("tools/list", Some(params)).await?;
        let list: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/list result: {}", e)))?;

        Ok(list.tools)
    }

    /// Invoke a tool (`tools/call`) and return its content.
    pub async fn call_method(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.wait_for_ready().await?;

        let params = serde_json::to_value(CallToolParams::new(name, arguments))?;
        let result = self.connection.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/call result: {}", e)))
    }

    /// Send an arbitrary envelope.
    ///
    /// With `expects_reply` the envelope gets a fresh id and the call resolves
    /// with the matching reply (`Some`) or a timeout; otherwise it resolves
    /// with `None` as soon as the send completes. Does not wait for
    /// readiness, but fails with [`McpError::NoEndpoint`] before the endpoint
    /// announcement.
    pub async fn send_message(
        &self,
        method: &str,
        params: Option<Value>,
        expects_reply: bool,
    ) -> Result<Option<JsonRpcResponse>> {
        self.connection.send_message(method, params, expects_reply).await
    }

    /// Send an application request once ready and return its `result`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.wait_for_ready().await?;
        self.connection.request(method, params).await
    }

    /// Send an application notification once ready.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.wait_for_ready().await?;
        self.connection.notify(method, params).await
    }

    /// Unsubscribe and fail every outstanding call with [`McpError::Closed`].
    ///
    /// Returns false if the client was already closed.
    pub async fn close(&self) -> bool {
        if !self.connection.lifecycle.close() {
            return false;
        }
        self.driver.abort();
        self.connection.transport.close();

        let failed = self
            .connection
            .registry
            .lock()
            .await
            .fail_all(|_| McpError::Closed);
        info!(failed, "MCP connection closed");
        true
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.lifecycle.state()
    }

    /// Ready and still attached to the event stream.
    pub fn is_connected(&self) -> bool {
        self.connection.lifecycle.is_connected()
    }

    /// Most recent transport error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.connection.lifecycle.last_error()
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.connection.initialized.get().map(|init| &init.server_info)
    }

    /// Full `initialize` result, available once the handshake completed.
    pub fn initialize_result(&self) -> Option<&InitializeResult> {
        self.connection.initialized.get()
    }

    pub fn client_info(&self) -> ClientInfo {
        self.connection.config.client_info()
    }

    /// The resolved POST target, once announced.
    pub fn endpoint(&self) -> Option<&Url> {
        self.connection.endpoint.get()
    }

    pub fn config(&self) -> &Config {
        &self.connection.config
    }

    /// Number of requests still waiting for a reply.
    pub async fn pending_calls(&self) -> usize {
        self.connection.registry.lock().await.len()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.driver.abort();
        self.connection.transport.close();
    }
}
