//! Assigns ids to proxy-originated requests and matches inbound responses by
//! id (C5 Request Correlator).
//!
//! Grounded in shape on `xandwr-mcpd`'s `ToolProxy` pending map
//! (`HashMap<i64, oneshot::Sender<Response>>` keyed by a monotonic
//! `AtomicI64`), generalized to the 5-second-timeout-with-synthesized-error
//! behavior `spec.md` §4.5 specifies. Proxy-originated ids are a separate
//! namespace from client ids: they are only ever written to the child and
//! consumed here, before Pump B would otherwise forward the response to the
//! client, so no collision is possible.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::{self, RequestId, INTERNAL_ERROR};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct PendingEntry {
    resolve: oneshot::Sender<Value>,
    timeout_handle: JoinHandle<()>,
}

/// Owns the pending-request table and the proxy-originated id counter.
pub struct RequestCorrelator {
    next_id: AtomicI64,
    pending: Arc<Mutex<HashMap<i64, PendingEntry>>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Issue a proxy-originated JSON-RPC request for `method`/`params`,
    /// writing the fully-formed request via `write`, and await a matching
    /// response for up to 5 seconds.
    ///
    /// `has_child` reflects whether there is a current child to write to at
    /// all; when `false`, the entry resolves immediately with
    /// `server_not_running()` and `write` is never invoked. Otherwise, if
    /// `write` fails, the entry resolves immediately with a synthetic
    /// `-32603` error carrying the failure message. If no response arrives
    /// within the timeout, the entry resolves with `-32603 "Request
    /// timeout"`. All three match `spec.md` §4.5 exactly.
    pub async fn call<F, Fut>(&self, method: &str, params: Value, has_child: bool, write: F) -> Value
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        if !has_child {
            return self.server_not_running();
        }

        let id = self.next();
        let request = protocol::build_request(id, method, params);

        let (tx, rx) = oneshot::channel();
        let pending_for_timeout = self.pending.clone();
        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TIMEOUT).await;
            if let Some(entry) = pending_for_timeout.lock().await.remove(&id) {
                let _ = entry.resolve.send(protocol::build_error_response(
                    RequestId::Number(id),
                    INTERNAL_ERROR,
                    "Request timeout",
                    None,
                ));
            }
        });

        self.pending.lock().await.insert(
            id,
            PendingEntry {
                resolve: tx,
                timeout_handle,
            },
        );

        if let Err(e) = write(request).await {
            if let Some(entry) = self.pending.lock().await.remove(&id) {
                entry.timeout_handle.abort();
                let _ = entry.resolve.send(protocol::build_error_response(
                    RequestId::Number(id),
                    INTERNAL_ERROR,
                    &e.to_string(),
                    None,
                ));
            }
        }

        rx.await.unwrap_or_else(|_| {
            protocol::build_error_response(RequestId::Number(id), INTERNAL_ERROR, "Request timeout", None)
        })
    }

    /// A synthetic `-32603 "Server not running"` response, for callers that
    /// have no current child to write to at all (`spec.md` §4.5).
    pub fn server_not_running(&self) -> Value {
        let id = self.next();
        protocol::build_error_response(RequestId::Number(id), INTERNAL_ERROR, "Server not running", None)
    }

    /// Resolve the pending entry for `id` with `response`, cancelling its
    /// timeout. No-op if the id is unknown (already resolved or timed out).
    pub async fn resolve(&self, id: i64, response: Value) {
        if let Some(entry) = self.pending.lock().await.remove(&id) {
            entry.timeout_handle.abort();
            let _ = entry.resolve.send(response);
        }
    }

    pub async fn has_pending(&self, id: i64) -> bool {
        self.pending.lock().await.contains_key(&id)
    }

    /// Reject every outstanding request with `reason` (used on shutdown).
    pub async fn reject_all(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (id, entry) in pending.drain() {
            entry.timeout_handle.abort();
            let _ = entry.resolve.send(protocol::build_error_response(
                RequestId::Number(id),
                INTERNAL_ERROR,
                reason,
                None,
            ));
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
