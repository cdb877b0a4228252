//! Connection handshake.
//!
//! `endpoint` announcement → `initialize` → `notifications/initialized` →
//! ready. Any failure along the way, including an unusable endpoint, is
//! final. The initialize request runs on its own task because its reply
//! comes back through the same event driver that triggered it.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use super::client::Connection;
use super::error::{McpError, Result};
use super::types::{InitializeParams, InitializeResult, ServerInfo};

/// Resolve an endpoint announcement against the subscription URL.
///
/// Relative paths keep the subscription's scheme and authority; absolute
/// URLs are taken as-is.
pub fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url> {
    Ok(base.join(announced.trim())?)
}

/// Handle an `endpoint` event.
pub(crate) fn on_endpoint(connection: &Arc<Connection>, announced: &str) {
    if let Some(existing) = connection.endpoint.get() {
        warn!(%existing, announced, "ignoring repeated endpoint announcement");
        return;
    }
    if connection.lifecycle.handshake_failed() {
        warn!(announced, "ignoring endpoint announcement after a failed handshake");
        return;
    }

    let target = match resolve_endpoint(connection.transport.url(), announced) {
        Ok(target) => target,
        Err(e) => {
            warn!(error = %e, announced, "unusable endpoint announcement");
            connection
                .lifecycle
                .fail_handshake(format!("invalid endpoint {:?}: {}", announced, e));
            return;
        }
    };

    info!(endpoint = %target, "server announced endpoint");
    let _ = connection.endpoint.set(target);

    if connection.lifecycle.begin_handshake() {
        tokio::spawn(initialize(Arc::clone(connection)));
    }
}

async fn initialize(connection: Arc<Connection>) {
    match perform(&connection).await {
        Ok(server) => info!(server = %server.name, version = %server.version, "MCP handshake complete"),
        Err(e) => {
            warn!(error = %e, "MCP handshake failed");
            connection.lifecycle.fail_handshake(e.to_string());
        }
    }
}

async fn perform(connection: &Connection) -> Result<ServerInfo> {
    let params = InitializeParams::new(
        connection.config.client.protocol_version.clone(),
        connection.config.client_info(),
    );
    let result = connection
        .request("initialize", Some(serde_json::to_value(params)?))
        .await?;
    let result: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("malformed initialize result: {}", e)))?;

    connection.notify("notifications/initialized", None).await?;

    let server = result.server_info.clone();
    let _ = connection.initialized.set(result);
    connection.lifecycle.mark_ready();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://host/sse").unwrap()
    }

    #[test]
    fn test_relative_endpoint() {
        let target = resolve_endpoint(&base(), "/messages?id=42").unwrap();
        assert_eq!(target.as_str(), "http://host/messages?id=42");
    }

    #[test]
    fn test_relative_endpoint_keeps_port_and_scheme() {
        let base = Url::parse("https://mcp.example.com:8443/v1/sse").unwrap();
        let target = resolve_endpoint(&base, "messages/?session_id=abc").unwrap();
        assert_eq!(target.as_str(), "https://mcp.example.com:8443/v1/messages/?session_id=abc");
    }

    #[test]
    fn test_absolute_endpoint() {
        let target = resolve_endpoint(&base(), " http://other:9000/post \n").unwrap();
        assert_eq!(target.as_str(), "http://other:9000/post");
    }
}
