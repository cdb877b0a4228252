//! Connection lifecycle.
//!
//! Holds the connection state behind a `watch` channel so any number of
//! tasks can wait for readiness and are all released by the same transition.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use super::error::{McpError, Result};

/// Where the connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Event stream requested, not yet open.
    Connecting,
    /// Event stream open, waiting for the server to announce its endpoint.
    AwaitingEndpoint,
    /// `initialize` in flight.
    Handshaking,
    /// Handshake complete; application calls are allowed.
    Ready,
    /// Closed by the caller.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingEndpoint => "awaiting endpoint",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Status {
    state: ConnectionState,
    /// Cleared by transport errors; a `Ready` connection that lost its
    /// stream stays `Ready` but refuses new calls.
    connected: bool,
    last_error: Option<String>,
    handshake_failure: Option<String>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            connected: false,
            last_error: None,
            handshake_failure: None,
        }
    }
}

impl Status {
    /// The outcome a readiness waiter should see, or `None` to keep waiting.
    fn readiness(&self) -> Option<Result<()>> {
        match self.state {
            ConnectionState::Ready if self.connected => Some(Ok(())),
            ConnectionState::Ready => Some(Err(McpError::Disconnected(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| "event stream ended".to_string()),
            ))),
            ConnectionState::Closed => Some(Err(McpError::Closed)),
            _ => self
                .handshake_failure
                .clone()
                .map(|reason| Err(McpError::Handshake(reason))),
        }
    }
}

/// Owner of the connection state.
#[derive(Debug)]
pub struct Lifecycle {
    status: watch::Sender<Status>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (status, _) = watch::channel(Status::default());
        Self { status }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Ready and still attached to the event stream.
    pub fn is_connected(&self) -> bool {
        let status = self.status.borrow();
        status.state == ConnectionState::Ready && status.connected
    }

    /// Most recent transport error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    /// The event stream opened.
    pub(crate) fn on_open(&self) {
        self.status.send_modify(|status| {
            if status.state == ConnectionState::Connecting {
                status.state = ConnectionState::AwaitingEndpoint;
            }
            if status.state != ConnectionState::Closed {
                status.connected = true;
            }
        });
    }

    /// True once the handshake has failed; it never starts again.
    pub(crate) fn handshake_failed(&self) -> bool {
        self.status.borrow().handshake_failure.is_some()
    }

    /// Move into `Handshaking`. False if a handshake already started or
    /// failed, or the connection is closed.
    pub(crate) fn begin_handshake(&self) -> bool {
        self.status.send_if_modified(|status| match status.state {
            _ if status.handshake_failure.is_some() => false,
            ConnectionState::Connecting | ConnectionState::AwaitingEndpoint => {
                status.state = ConnectionState::Handshaking;
                status.connected = true;
                true
            }
            _ => false,
        })
    }

    /// Handshake finished; releases every readiness waiter.
    pub(crate) fn mark_ready(&self) -> bool {
        self.status.send_if_modified(|status| {
            if status.state != ConnectionState::Handshaking {
                return false;
            }
            status.state = ConnectionState::Ready;
            true
        })
    }

    /// Handshake gave up; waiters are released with the failure.
    pub(crate) fn fail_handshake(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.status.send_if_modified(|status| match status.state {
            ConnectionState::Ready | ConnectionState::Closed => false,
            _ => {
                status.handshake_failure = Some(reason);
                true
            }
        });
    }

    /// A transport error was observed.
    pub(crate) fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.status.send_modify(|status| {
            status.connected = false;
            status.last_error = Some(error);
        });
    }

    /// The event stream ended; keeps an earlier error as the reason.
    pub(crate) fn on_stream_end(&self) {
        self.status.send_modify(|status| {
            status.connected = false;
            status
                .last_error
                .get_or_insert_with(|| "event stream ended".to_string());
        });
    }

    /// Move into `Closed`. Returns false if it already was.
    pub(crate) fn close(&self) -> bool {
        self.status.send_if_modified(|status| {
            if status.state == ConnectionState::Closed {
                return false;
            }
            status.state = ConnectionState::Closed;
            status.connected = false;
            true
        })
    }

    /// Wait until the handshake completes.
    ///
    /// Resolves immediately when already ready. Fails on handshake failure,
    /// close, loss of the stream after readiness, or after `limit` elapses.
    pub async fn wait_for_ready(&self, limit: Duration) -> Result<()> {
        let mut status = self.status.subscribe();

        let waited = tokio::time::timeout(limit, async {
            loop {
                let readiness = status.borrow_and_update().readiness();
                if let Some(outcome) = readiness {
                    return outcome;
                }
                if status.changed().await.is_err() {
                    return Err(McpError::Closed);
                }
            }
        })
        .await;

        match waited {
            Ok(outcome) => outcome,
            Err(_) => {
                let status = self.status.borrow();
                let reason = match &status.last_error {
                    Some(error) => format!("still {} after {:?}: {}", status.state, limit, error),
                    None => format!("still {} after {:?}", status.state, limit),
                };
                Err(McpError::NotReady(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const LIMIT: Duration = Duration::from_secs(5);

    fn ready() -> Lifecycle {
        let lifecycle = Lifecycle::new();
        lifecycle.on_open();
        assert!(lifecycle.begin_handshake());
        assert!(lifecycle.mark_ready());
        lifecycle
    }

    #[test]
    fn test_state_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);

        lifecycle.on_open();
        assert_eq!(lifecycle.state(), ConnectionState::AwaitingEndpoint);

        assert!(lifecycle.begin_handshake());
        assert!(!lifecycle.begin_handshake());
        assert_eq!(lifecycle.state(), ConnectionState::Handshaking);

        assert!(lifecycle.mark_ready());
        assert!(!lifecycle.mark_ready());
        assert_eq!(lifecycle.state(), ConnectionState::Ready);
        assert!(lifecycle.is_connected());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_ready() {
        let lifecycle = ready();
        lifecycle.wait_for_ready(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_all_waiters_released_by_ready() {
        let lifecycle = Arc::new(Lifecycle::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let lifecycle = Arc::clone(&lifecycle);
            waiters.push(tokio::spawn(async move { lifecycle.wait_for_ready(LIMIT).await }));
        }
        tokio::task::yield_now().await;

        lifecycle.on_open();
        lifecycle.begin_handshake();
        lifecycle.mark_ready();

        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_for_ready(LIMIT).await })
        };
        tokio::task::yield_now().await;

        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(matches!(waiter.await.unwrap(), Err(McpError::Closed)));
    }

    #[tokio::test]
    async fn test_handshake_failure_releases_waiters() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_handshake();
        lifecycle.fail_handshake("initialize rejected");

        let outcome = lifecycle.wait_for_ready(LIMIT).await;
        assert!(matches!(outcome, Err(McpError::Handshake(reason)) if reason == "initialize rejected"));
    }

    #[tokio::test]
    async fn test_handshake_never_restarts_after_failure() {
        let lifecycle = Lifecycle::new();
        lifecycle.on_open();
        lifecycle.fail_handshake("invalid endpoint");

        assert!(lifecycle.handshake_failed());
        assert!(!lifecycle.begin_handshake());
        assert_eq!(lifecycle.state(), ConnectionState::AwaitingEndpoint);
        assert!(matches!(
            lifecycle.wait_for_ready(LIMIT).await,
            Err(McpError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_error_before_ready_keeps_waiting_until_limit() {
        let lifecycle = Lifecycle::new();
        lifecycle.record_error("connection refused");

        let outcome = lifecycle.wait_for_ready(Duration::from_millis(30)).await;
        match outcome {
            Err(McpError::NotReady(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("expected not ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_after_ready_disconnects() {
        let lifecycle = ready();
        lifecycle.record_error("stream reset");

        assert_eq!(lifecycle.state(), ConnectionState::Ready);
        assert!(!lifecycle.is_connected());
        let outcome = lifecycle.wait_for_ready(LIMIT).await;
        assert!(matches!(outcome, Err(McpError::Disconnected(reason)) if reason == "stream reset"));
    }
}
