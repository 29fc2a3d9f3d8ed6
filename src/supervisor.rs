//! Top-level orchestration loop (C10). Owns the initial spawn, the singleton
//! client-stdin pump, the change watcher, and the unexpected-exit poller.
//!
//! Grounded on `cli/src/main.rs`'s `run_stdio_server` crash-loop (teacher):
//! spawn, watch for the thing going away, respawn, repeat until cancelled.
//! The teacher backs off exponentially on repeated crashes; this proxy keeps
//! a flat ~1s retry per `spec.md` §4.7, since an unexpected exit here is
//! meant to be rare (the common case is a debounced, deliberate restart).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::forwarder;
use crate::restart::{self, RestartController};
use crate::state::ProxyState;
use crate::watch::{ChangeSource, NotifyChangeSource};

/// How often the supervisor polls the current child for an unexpected exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Backoff between respawn attempts after a failed spawn (initial or
/// unexpected-exit driven). Flat, not exponential — see module docs.
const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);

/// Run the proxy to completion: spawn the child, wire the pumps and the
/// watcher, and loop until shutdown is requested. `client_stdin` is the
/// proxy's real stdin (or a test double); Pump A is started on it exactly
/// once, here.
pub async fn run<R>(state: Arc<ProxyState>, client_stdin: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let restart_controller = RestartController::new(state.clone());

    loop {
        if spawn_initial_child(&state).await {
            break;
        }
        if state.is_shutdown_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(RESPAWN_BACKOFF) => {},
            _ = state.shutdown.cancelled() => return,
        }
    }

    forwarder::spawn_client_stdin_pump(state.clone(), tokio::io::BufReader::new(client_stdin));

    if !state.config.watch_targets.is_empty() {
        spawn_change_watcher(state.clone(), restart_controller.clone());
    }

    spawn_exit_poller(state.clone(), restart_controller.clone());

    state.shutdown.cancelled().await;

    // Shutdown sequence (`spec.md` §5): clear any debounced restart that
    // hasn't fired yet, then invoke the kill path synchronously so no child
    // the proxy owns outlives this process.
    restart_controller.clear();
    restart::kill_current_child(&state).await;
    state.correlator.reject_all("Proxy shutting down").await;
}

/// Spawn the first child, reusing the Restart Controller's own spawn path
/// (container-label injection, pump wiring) so the initial spawn and every
/// later respawn behave identically. Returns `true` on success.
async fn spawn_initial_child(state: &Arc<ProxyState>) -> bool {
    match restart::spawn_new_child(state).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, command = %state.config.command, "spawn failed, retrying");
            false
        }
    }
}

fn spawn_change_watcher(state: Arc<ProxyState>, restart_controller: RestartController) {
    let source = NotifyChangeSource;
    let mut rx = match source.watch(state.config.watch_targets.clone()) {
        Ok(rx) => rx,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install file watcher, hot reload via watch targets disabled");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) if event.kind.triggers_restart() => {
                            tracing::info!(path = %event.path.display(), kind = ?event.kind, "change observed, scheduling restart");
                            restart_controller.restart();
                        }
                        Some(_) => {}
                        None => {
                            tracing::debug!("change source closed");
                            break;
                        }
                    }
                }
                _ = state.shutdown.cancelled() => break,
            }
        }
    });
}

/// Poll the current child for an unexpected exit (one not caused by the
/// Restart Controller, which clears `child` itself before killing). On an
/// unexpected exit, respawn immediately — no debounce, there is nothing left
/// to kill (`spec.md` §4.7).
fn spawn_exit_poller(state: Arc<ProxyState>, restart_controller: RestartController) {
    // Keep the controller alive for the supervisor's lifetime; nothing else
    // holds it once `run` returns its local.
    let _keep_alive = restart_controller;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {},
                _ = state.shutdown.cancelled() => return,
            }

            if state.is_restarting() {
                continue;
            }

            let exited = {
                let mut guard = state.child.lock().await;
                match guard.as_mut() {
                    Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                    None => false,
                }
            };

            if exited {
                tracing::warn!("child exited unexpectedly, respawning");
                *state.child.lock().await = None;
                loop {
                    if spawn_initial_child(&state).await {
                        break;
                    }
                    if state.is_shutdown_requested() {
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(RESPAWN_BACKOFF) => {},
                        _ = state.shutdown.cancelled() => return,
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::process::TokioProcessManager;
    use std::collections::{HashMap, HashSet};

    fn test_config() -> ProxyConfig {
        ProxyConfig {
            command: "/this/command/does/not/exist-mcpmon-supervisor".into(),
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
    async fn test_run_exits_promptly_on_shutdown_during_spawn_retry_loop() {
        let state = Arc::new(ProxyState::new(
            test_config(),
            Arc::new(TokioProcessManager),
            Box::new(tokio::io::sink()),
        ));
        let state_for_shutdown = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            state_for_shutdown.request_shutdown();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            run(state, tokio::io::empty()),
        )
        .await;
        assert!(result.is_ok(), "run() should return once shutdown is requested");
    }

    #[tokio::test]
    async fn test_run_kills_current_child_on_shutdown() {
        let config = ProxyConfig {
            command: "sleep".into(),
            command_args: vec!["30".to_string()],
            watch_targets: HashSet::new(),
            env: HashMap::new(),
            restart_delay_ms: 0,
            kill_delay_ms: 0,
            ready_delay_ms: 0,
            session_id: "test-session".into(),
            verbose: false,
        };
        let state = Arc::new(ProxyState::new(
            config,
            Arc::new(TokioProcessManager),
            Box::new(tokio::io::sink()),
        ));

        let state_for_shutdown = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            state_for_shutdown.request_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(5), run(state.clone(), tokio::io::empty()))
            .await
            .expect("run() should return once shutdown is requested");

        assert!(
            state.child.lock().await.is_none(),
            "shutdown must clear the child handle"
        );
    }
}
