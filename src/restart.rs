//! Debounced restart trigger and the restart sequence itself (C8).
//!
//! `Debouncer` is grounded on `src/standalone/hot_reload.rs`'s
//! sleep-then-drain-remaining-events pattern (teacher), generalized from an
//! inline `tokio::select!` loop into a reusable value with `call`/`clear`/
//! `flush` methods, per `spec.md` §9 ("Debounce as a pure value ... this
//! keeps tests deterministic"). The restart sequence itself generalizes the
//! teacher's "rebuild a registry and swap it" reload to the full
//! kill→spawn→replay→refresh→notify→drain sequence `spec.md` §4.3 specifies;
//! the teacher's peer-list notification/pruning has no analogue here (one
//! client, not a set of peers) and is not carried forward.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::container;
use crate::error::Result;
use crate::forwarder;
use crate::protocol::{self};
use crate::state::ProxyState;

const GRACEFUL_KILL_WATCHDOG: Duration = Duration::from_secs(5);

type Action = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A debounced action: repeated `call()`s within `delay` of each other
/// collapse into a single invocation `delay` after the last call.
#[derive(Clone)]
pub struct Debouncer {
    delay: Duration,
    action: Action,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(delay: Duration, action: Action) -> Self {
        Self {
            delay,
            action,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule the action `delay` from now. A call made before the previous
    /// one fires supersedes it — the superseded invocation becomes a no-op
    /// rather than running early.
    pub fn call(&self) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let delay = self.delay;
        let action = self.action.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) == my_generation {
                action().await;
            }
        });
    }

    /// Cancel any pending invocation without running it.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Cancel any pending invocation and run the action immediately.
    pub async fn flush(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        (self.action)().await;
    }
}

/// Debounced `restart()` trigger bound to one `ProxyState`. Cheaply `Clone`
/// (the inner `Debouncer` shares its generation counter and action via
/// `Arc`), so every task that needs to trigger a restart can hold its own
/// handle.
#[derive(Clone)]
pub struct RestartController {
    debouncer: Debouncer,
}

impl RestartController {
    pub fn new(state: Arc<ProxyState>) -> Self {
        let delay = Duration::from_millis(state.config.restart_delay_ms);
        let action: Action = Arc::new(move || {
            let state = state.clone();
            Box::pin(async move { run_restart(&state).await })
        });
        Self {
            debouncer: Debouncer::new(delay, action),
        }
    }

    pub fn restart(&self) {
        self.debouncer.call();
    }

    pub fn clear(&self) {
        self.debouncer.clear();
    }

    pub async fn flush(&self) {
        self.debouncer.flush().await;
    }
}

/// Sleep for `duration`, returning early (with `true`) if shutdown is
/// requested first. Restart-step sleeps are interruptible by shutdown
/// (`spec.md` §5).
async fn interruptible_sleep(state: &ProxyState, duration: Duration) -> bool {
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = state.shutdown.cancelled() => true,
    }
}

async fn write_as_io(state: &ProxyState, msg: Value) -> std::io::Result<()> {
    state
        .write_to_child(&msg)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

fn unix_ms_now() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Step 2–3: kill the current child (if any) and release the handle.
/// Graceful signal, 5-second watchdog, force-kill, liveness probe, and the
/// container-aware stop path (§4.6) all apply here. Also the shutdown-path
/// kill (`spec.md` §5: "the kill path is invoked synchronously"), called
/// directly from the Supervisor rather than through a restart cycle.
pub(crate) async fn kill_current_child(state: &ProxyState) {
    let mut guard = state.child.lock().await;
    let Some(mut child) = guard.take() else {
        return;
    };
    drop(guard);

    if let Some(container_id) = child.container_id.clone() {
        container::stop_container(&container_id).await;
    }

    child.terminate_gracefully();

    let status = tokio::select! {
        result = child.wait() => result,
        _ = tokio::time::sleep(GRACEFUL_KILL_WATCHDOG) => {
            tracing::warn!(pid = child.pid, "graceful-kill watchdog fired, force-killing");
            let _ = child.force_kill().await;
            child.wait().await
        }
    };

    match status {
        Ok(status) => tracing::info!(pid = child.pid, ?status, "child exited"),
        Err(e) => tracing::warn!(pid = child.pid, error = %e, "error waiting on child"),
    }

    if child.is_alive() {
        tracing::warn!(pid = child.pid, "child still alive after wait, forcing kill");
        let _ = child.force_kill().await;
    }
}

/// Step 5: spawn the replacement child, injecting container labels when the
/// command is `docker run` (§4.4), and hand its stdout/stderr to fresh Pump
/// B/C tasks.
pub(crate) async fn spawn_new_child(state: &Arc<ProxyState>) -> Result<()> {
    let mut args = state.config.command_args.clone();
    let is_docker_run = container::is_docker_run(&state.config.command, &args);

    if is_docker_run {
        let labels = container::ContainerLabels {
            session_id: state.config.session_id.clone(),
            proxy_pid: std::process::id(),
            started_unix_ms: unix_ms_now(),
        };
        container::inject_labels(&mut args, &labels);
    }

    let mut handle = state
        .process_manager
        .spawn(&state.config.command, &args, &state.config.env)?;

    if is_docker_run {
        handle.container_id = container::capture_container_id(&state.config.session_id).await;
    }

    let stdout = handle.stdout.take().expect("stdout taken exactly once after spawn");
    let stderr = handle.stderr.take().expect("stderr taken exactly once after spawn");

    tracing::info!(pid = handle.pid, command = %state.config.command, "child spawned");
    *state.child.lock().await = Some(handle);
    forwarder::spawn_child_pumps(state.clone(), stdout, stderr);

    Ok(())
}

/// The full restart sequence, `spec.md` §4.3 steps 1–11.
async fn run_restart(state: &Arc<ProxyState>) {
    state.set_restarting(true);

    kill_current_child(state).await;

    if interruptible_sleep(state, Duration::from_millis(state.config.kill_delay_ms)).await {
        state.set_restarting(false);
        return;
    }

    if let Err(e) = spawn_new_child(state).await {
        tracing::warn!(error = %e, "respawn failed, aborting this restart cycle");
        state.set_restarting(false);
        return;
    }

    if interruptible_sleep(state, Duration::from_millis(state.config.ready_delay_ms)).await {
        state.set_restarting(false);
        return;
    }

    // Step 7: replay initialize.
    if let Some(params) = state.session.captured_initialize_params().await {
        let has_child = state.has_current_child().await;
        let response = state
            .correlator
            .call("initialize", params, has_child, |req| write_as_io(state, req))
            .await;
        if let Some(error) = response.get("error") {
            tracing::warn!(?error, "initialize replay against new child failed");
        } else {
            tracing::info!("initialize replayed against new child");
        }
    }

    // Step 8: refresh tools and merge extension-provided ones.
    let has_child = state.has_current_child().await;
    let tools_response = state
        .correlator
        .call("tools/list", json!({}), has_child, |req| write_as_io(state, req))
        .await;
    let mut tools: Vec<Value> = tools_response
        .get("result")
        .and_then(|r| r.get("tools"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let get_additional_tools = state.hooks.lock().await.get_additional_tools.clone();
    if let Some(hook) = get_additional_tools {
        match hook().await {
            Ok(extra) => {
                for tool in extra {
                    match serde_json::to_value(&tool) {
                        Ok(v) => tools.push(v),
                        Err(e) => tracing::warn!(error = %e, "failed to serialize extension tool"),
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "getAdditionalTools hook failed during refresh"),
        }
    }

    // Step 9: notify client.
    let notification = protocol::build_notification("notifications/tools/list_changed", json!({ "tools": tools }));
    if let Err(e) = state.write_to_client(&notification).await {
        tracing::warn!(error = %e, "failed to write tools/list_changed notification");
    }

    // Step 10: drain buffer.
    for message in state.buffer.drain().await {
        if let Err(e) = state.write_to_child(&message).await {
            tracing::warn!(error = %e, "failed to replay buffered message to new child");
        }
    }

    state.set_restarting(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_debouncer_collapses_bursts_to_one_call() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_action = count.clone();
        let debouncer = Debouncer::new(
            Duration::from_millis(50),
            Arc::new(move || {
                let count = count_for_action.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        for _ in 0..10 {
            debouncer.call();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_debouncer_clear_cancels_pending() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_action = count.clone();
        let debouncer = Debouncer::new(
            Duration::from_millis(30),
            Arc::new(move || {
                let count = count_for_action.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        debouncer.call();
        debouncer.clear();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_debouncer_flush_runs_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_action = count.clone();
        let debouncer = Debouncer::new(
            Duration::from_secs(30),
            Arc::new(move || {
                let count = count_for_action.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        debouncer.call();
        debouncer.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
