//! Shared state threaded through the pumps, the Restart Controller, and the
//! Supervisor (the "external" C1/C2/C3 collaborators plus C5–C7 from
//! `spec.md` §2, gathered behind one `Arc` so no module owns a private copy).
//!
//! Grounded in the *pattern* of `src/standalone/server.rs`'s
//! `Arc<RwLock<...>>` shared-state-across-tasks style (teacher), generalized
//! to the full set of cross-cutting state this proxy needs: the child
//! handle, the pending-request table, the message buffer, session state, and
//! the two monotonic flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::buffer::MessageBuffer;
use crate::config::ProxyConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{ProxyError, Result};
use crate::hooks::Hooks;
use crate::process::{ChildHandle, ProcessManager};
use crate::protocol;
use crate::session::SessionState;

/// Everything the pumps, the Restart Controller, and the Supervisor share.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub process_manager: Arc<dyn ProcessManager>,
    pub child: Mutex<Option<ChildHandle>>,
    pub client_stdout: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pub correlator: RequestCorrelator,
    pub session: SessionState,
    pub buffer: MessageBuffer,
    pub hooks: Mutex<Hooks>,
    pub restarting: AtomicBool,
    /// Cancelled exactly once, on shutdown; restart-step sleeps race against
    /// it so they can be interrupted (`spec.md` §5).
    pub shutdown: CancellationToken,
}

impl ProxyState {
    pub fn new(
        config: ProxyConfig,
        process_manager: Arc<dyn ProcessManager>,
        client_stdout: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            config,
            process_manager,
            child: Mutex::new(None),
            client_stdout: Mutex::new(client_stdout),
            correlator: RequestCorrelator::new(),
            session: SessionState::new(),
            buffer: MessageBuffer::default(),
            hooks: Mutex::new(Hooks::default()),
            restarting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    pub fn set_restarting(&self, value: bool) {
        self.restarting.store(value, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Idempotent: cancelling an already-cancelled token is a no-op.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Write `msg` to the current child's stdin, serializing with other
    /// writers via the child mutex (§5 Invariant 1: single writer per
    /// channel). Fails with `ServerNotRunning` if there is no current child.
    pub async fn write_to_child(&self, msg: &Value) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(ProxyError::ServerNotRunning);
        };
        let line = protocol::to_line(msg);
        child
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProxyError::WriteFailed("child stdin".into(), e.to_string()))
    }

    /// Write `msg` to the client's stdout, serializing with other writers
    /// via the stdout mutex (§5 Invariant 1).
    pub async fn write_to_client(&self, msg: &Value) -> Result<()> {
        let line = protocol::to_line(msg);
        let mut guard = self.client_stdout.lock().await;
        guard
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProxyError::WriteFailed("client stdout".into(), e.to_string()))
    }

    /// Write a non-JSON line to the current child's stdin verbatim, for
    /// passthrough of raw lines on the client→server direction. No-op
    /// (logged) if there is no current child.
    pub async fn write_raw_to_child(&self, line: &str) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Err(ProxyError::ServerNotRunning);
        };
        child
            .stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| ProxyError::WriteFailed("child stdin".into(), e.to_string()))
    }

    /// Write a non-JSON line to the client's stdout verbatim.
    pub async fn write_raw_to_client(&self, line: &str) -> Result<()> {
        let mut guard = self.client_stdout.lock().await;
        guard
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| ProxyError::WriteFailed("client stdout".into(), e.to_string()))
    }

    pub async fn has_current_child(&self) -> bool {
        self.child.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::TokioProcessManager;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            command: "true".into(),
            command_args: vec![],
            watch_targets: HashSet::new(),
            env: HashMap::new(),
            restart_delay_ms: 0,
            kill_delay_ms: 0,
            ready_delay_ms: 0,
            session_id: "test-session".into(),
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_write_to_child_without_child_is_server_not_running() {
        let state = ProxyState::new(test_config(), Arc::new(TokioProcessManager), Box::new(tokio::io::sink()));
        let result = state.write_to_child(&json!({"method": "initialize"})).await;
        assert!(matches!(result, Err(ProxyError::ServerNotRunning)));
    }

    #[tokio::test]
    async fn test_write_to_client_succeeds_against_sink() {
        let state = ProxyState::new(test_config(), Arc::new(TokioProcessManager), Box::new(tokio::io::sink()));
        let result = state.write_to_client(&json!({"jsonrpc": "2.0", "method": "notifications/x"})).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_restarting_flag_roundtrip() {
        let state = ProxyState::new(test_config(), Arc::new(TokioProcessManager), Box::new(tokio::io::sink()));
        assert!(!state.is_restarting());
        state.set_restarting(true);
        assert!(state.is_restarting());
    }

    #[test]
    fn test_shutdown_flag_is_monotonic_in_practice() {
        let state = ProxyState::new(test_config(), Arc::new(TokioProcessManager), Box::new(tokio::io::sink()));
        state.request_shutdown();
        assert!(state.is_shutdown_requested());
    }
}
