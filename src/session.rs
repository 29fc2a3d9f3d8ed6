//! Cross-request correlation state shared by both pumps and the restart
//! controller (C7 Session State).

use std::collections::HashSet;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::protocol::RequestId;

/// Singleton session state: the captured `initialize` params (set at most
/// once) and the set of client `tools/list` request ids awaiting extension
/// tool injection.
#[derive(Default)]
pub struct SessionState {
    captured_initialize_params: RwLock<Option<Value>>,
    pending_tools_list_injection: RwLock<HashSet<RequestId>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `params` the first time an `initialize` request is observed.
    /// No-op on subsequent calls — Invariant 3: captured at most once per
    /// proxy lifetime.
    pub async fn capture_initialize(&self, params: Value) {
        let mut guard = self.captured_initialize_params.write().await;
        if guard.is_none() {
            *guard = Some(params);
        }
    }

    /// The captured `initialize` params, if any have been observed yet.
    pub async fn captured_initialize_params(&self) -> Option<Value> {
        self.captured_initialize_params.read().await.clone()
    }

    /// Record that `id` must have extension tools merged into its response.
    pub async fn mark_pending_tools_list(&self, id: RequestId) {
        self.pending_tools_list_injection.write().await.insert(id);
    }

    /// Remove `id` from the pending set, returning whether it was present.
    /// Removal happens exactly once per id (Invariant 4).
    pub async fn take_pending_tools_list(&self, id: &RequestId) -> bool {
        self.pending_tools_list_injection.write().await.remove(id)
    }
}
