//! Event driver.
//!
//! The single consumer of the transport's event channel. Events are handled
//! strictly in arrival order; nothing here waits on a reply, so replies keep
//! flowing while callers are suspended.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::Connection;
use super::handshake;
use super::transport::TransportEvent;
use super::types::JsonRpcMessage;

pub(crate) async fn run(connection: Arc<Connection>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open => {
                info!(url = %connection.transport.url(), "event stream open");
                connection.lifecycle.on_open();
            }
            TransportEvent::Error(error) => {
                warn!(%error, state = %connection.lifecycle.state(), "event stream error");
                connection.lifecycle.record_error(error);
            }
            TransportEvent::Endpoint(announced) => handshake::on_endpoint(&connection, &announced),
            TransportEvent::Message(payload) => route(&connection, &payload).await,
        }
    }

    debug!("event stream finished");
    connection.lifecycle.on_stream_end();
}

/// Hand a reply to whoever is waiting on its id.
async fn route(connection: &Connection, payload: &str) {
    let message: JsonRpcMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "dropping unparsable message");
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => {
            let Some(id) = response.numeric_id() else {
                debug!(id = %response.id, "dropping reply without a numeric id");
                return;
            };
            debug!(id, "received reply");
            if !connection.registry.lock().await.resolve(id, response) {
                debug!(id, "dropping unmatched reply");
            }
        }
        JsonRpcMessage::Request(request) => {
            debug!(method = request.method(), "ignoring server-initiated message");
        }
    }
}
