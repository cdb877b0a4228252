//! Pending-call registry.
//!
//! Maps request identifiers to the continuation of the caller awaiting the
//! reply. An entry is removed in the same step that delivers its outcome, so
//! a reply and a timeout for one identifier can never both be observed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;

use super::error::{McpError, Result};
use super::types::JsonRpcResponse;

/// Receives the reply for one outstanding request, or the error that ended it.
pub type Continuation = oneshot::Sender<Result<JsonRpcResponse>>;

/// Outstanding requests keyed by identifier.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<u64, Continuation>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new outstanding request.
    ///
    /// Entries whose caller has gone away are dropped first.
    pub fn register(&mut self, id: u64, continuation: Continuation) -> Result<()> {
        self.calls.retain(|_, waiting| !waiting.is_closed());

        match self.calls.entry(id) {
            Entry::Occupied(_) => Err(McpError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(continuation);
                Ok(())
            }
        }
    }

    /// Deliver a reply. Returns false when nothing is waiting on `id`
    /// (late or duplicate reply); the reply is then discarded.
    pub fn resolve(&mut self, id: u64, response: JsonRpcResponse) -> bool {
        match self.calls.remove(&id) {
            Some(waiting) => {
                let _ = waiting.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Fail `id` with a timeout. No-op if it was already resolved.
    pub fn expire(&mut self, id: u64, after: Duration) -> bool {
        match self.calls.remove(&id) {
            Some(waiting) => {
                let _ = waiting.send(Err(McpError::Timeout { id, after }));
                true
            }
            None => false,
        }
    }

    /// Forget `id` without notifying its caller.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Fail every outstanding request, returning how many there were.
    pub fn fail_all(&mut self, mut error: impl FnMut(u64) -> McpError) -> usize {
        let drained: Vec<_> = self.calls.drain().collect();
        let count = drained.len();
        for (id, waiting) in drained {
            let _ = waiting.send(Err(error(id)));
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(id: u64) -> JsonRpcResponse {
        JsonRpcResponse::success(id, json!({"ok": id}))
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut calls = PendingCalls::new();
        let (first, _keep_first) = oneshot::channel();
        let (second, _keep_second) = oneshot::channel();

        calls.register(1, first).unwrap();
        assert!(matches!(calls.register(1, second), Err(McpError::DuplicateId(1))));
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let mut calls = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        calls.register(4, tx).unwrap();

        assert!(calls.resolve(4, reply(4)));
        assert!(!calls.resolve(4, reply(4)));
        assert!(calls.is_empty());

        let delivered = rx.await.unwrap().unwrap();
        assert_eq!(delivered.result, Some(json!({"ok": 4})));
    }

    #[tokio::test]
    async fn test_expire_after_resolve_is_noop() {
        let mut calls = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        calls.register(2, tx).unwrap();

        assert!(calls.resolve(2, reply(2)));
        assert!(!calls.expire(2, Duration::from_millis(10)));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reply_after_expire_is_dropped() {
        let mut calls = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        calls.register(9, tx).unwrap();

        assert!(calls.expire(9, Duration::from_millis(10)));
        assert!(!calls.resolve(9, reply(9)));

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(McpError::Timeout { id: 9, .. })));
    }

    #[test]
    fn test_cancel_forgets_without_delivery() {
        let mut calls = PendingCalls::new();
        let (tx, mut rx) = oneshot::channel();
        calls.register(5, tx).unwrap();

        assert!(calls.cancel(5));
        assert!(!calls.contains(5));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fail_all_drains_every_entry() {
        let mut calls = PendingCalls::new();
        let (a, rx_a) = oneshot::channel();
        let (b, rx_b) = oneshot::channel();
        calls.register(1, a).unwrap();
        calls.register(2, b).unwrap();

        assert_eq!(calls.fail_all(|_| McpError::Closed), 2);
        assert!(calls.is_empty());
        assert!(matches!(rx_a.await.unwrap(), Err(McpError::Closed)));
        assert!(matches!(rx_b.await.unwrap(), Err(McpError::Closed)));
    }

    #[test]
    fn test_register_prunes_abandoned_callers() {
        let mut calls = PendingCalls::new();
        let (abandoned, rx) = oneshot::channel();
        calls.register(1, abandoned).unwrap();
        drop(rx);

        let (live, _rx_live) = oneshot::channel();
        calls.register(2, live).unwrap();
        assert!(!calls.contains(1));
        assert!(calls.contains(2));
    }
}
