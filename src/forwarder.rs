//! The three IO pumps (C9): client-stdin → child-stdin, child-stdout →
//! client-stdout, child-stderr → client-stderr.
//!
//! Grounded on `src/server/stdio.rs`'s one-task-per-stream pattern
//! (`start_stdout_filter`, `start_stderr_drain`), generalized from
//! noisy-server line filtering to the hook-consulting, buffer-aware,
//! correlator-aware three-pump design `spec.md` §4.2 specifies.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};

use crate::framer::{self, Frame};
use crate::protocol::{self, RequestId};
use crate::state::ProxyState;

/// Start Pump A: client stdin → child stdin. A singleton — call exactly
/// once per process lifetime; it outlives every restart (`spec.md` §5
/// Invariant 2).
pub fn spawn_client_stdin_pump<R>(state: Arc<ProxyState>, reader: R)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match framer::read_frame(&mut reader).await {
                Ok(Some(frame)) => handle_client_frame(&state, frame).await,
                Ok(None) => {
                    tracing::debug!("client stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "client stdin read error");
                    break;
                }
            }
        }
    });
}

async fn handle_client_frame(state: &Arc<ProxyState>, frame: Frame) {
    let mut m = match frame {
        Frame::Raw(line) => {
            if let Err(e) = state.write_raw_to_child(&line).await {
                tracing::debug!(error = %e, "dropping raw client line, no current child");
            }
            return;
        }
        Frame::Json(v) => v,
    };

    let before_hook = state.hooks.lock().await.before_stdin_forward.clone();
    if let Some(hook) = before_hook {
        match hook(m.clone()).await {
            Ok(modified) => m = modified,
            Err(e) => tracing::warn!(error = %e, "beforeStdinForward hook failed, using original message"),
        }
    }

    let method = protocol::method_of(&m).map(str::to_string);

    if method.as_deref() == Some("initialize") {
        if let Some(params) = m.get("params").cloned() {
            state.session.capture_initialize(params).await;
        }
    }

    if method.as_deref() == Some("tools/list") {
        if let Some(id) = protocol::id_of(&m) {
            // Marked regardless of whether there's a child to forward to now:
            // a buffered `tools/list` is replayed verbatim to the next child
            // by the restart drain, and its response still needs extension
            // tools merged in when it comes back.
            state.session.mark_pending_tools_list(id.clone()).await;
            if state.has_current_child().await {
                if let Err(e) = state.write_to_child(&m).await {
                    tracing::warn!(error = %e, "failed to forward tools/list to child");
                }
            } else {
                state.buffer.push(m).await;
            }
            return;
        }
    }

    if method.as_deref() == Some("tools/call") {
        let name = m
            .get("params")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(name) = &name {
            if name.starts_with("mcpmon_") || name.starts_with("mcpmon.") {
                let handle_tool_call = state.hooks.lock().await.handle_tool_call.clone();
                if let Some(hook) = handle_tool_call {
                    let id = protocol::id_of(&m).unwrap_or(RequestId::Null);
                    let args = m.get("params").and_then(|p| p.get("arguments")).cloned();
                    match hook(name.clone(), args).await {
                        Ok(Some(result)) => {
                            let response = protocol::build_response(id, result);
                            if let Err(e) = state.write_to_client(&response).await {
                                tracing::warn!(error = %e, "failed to write extension tool response");
                            }
                            return;
                        }
                        Ok(None) => {
                            // Not handled by the extension; fall through to normal forwarding.
                        }
                        Err(e) => {
                            let error = protocol::build_error_response(
                                id,
                                protocol::INTERNAL_ERROR,
                                &e.to_string(),
                                Some(json!({ "toolName": name })),
                            );
                            if let Err(e2) = state.write_to_client(&error).await {
                                tracing::warn!(error = %e2, "failed to write extension tool error response");
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    if state.is_restarting() {
        state.buffer.push(m).await;
    } else if let Err(e) = state.write_to_child(&m).await {
        tracing::warn!(error = %e, "failed to forward client message to child");
    }
}

/// Start Pump B (child stdout → client stdout) and Pump C (child stderr →
/// client stderr) for one child. Recreated after every respawn.
pub fn spawn_child_pumps(state: Arc<ProxyState>, stdout: ChildStdout, stderr: ChildStderr) {
    let state_b = state.clone();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        loop {
            match framer::read_frame(&mut reader).await {
                Ok(Some(frame)) => handle_child_stdout_frame(&state_b, frame).await,
                Ok(None) => {
                    tracing::debug!("child stdout closed");
                    break;
                }
                Err(e) => {
                    if !state_b.is_restarting() {
                        tracing::warn!(error = %e, "child stdout read error");
                    }
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut stderr = stderr;
        let mut out = tokio::io::stderr();
        if let Err(e) = tokio::io::copy(&mut stderr, &mut out).await {
            tracing::debug!(error = %e, "child stderr copy ended");
        }
        let _ = out.flush().await;
    });
}

async fn handle_child_stdout_frame(state: &Arc<ProxyState>, frame: Frame) {
    let mut m = match frame {
        Frame::Raw(line) => {
            if let Err(e) = state.write_raw_to_client(&line).await {
                tracing::warn!(error = %e, "failed to forward raw child stdout line to client");
            }
            return;
        }
        Frame::Json(v) => v,
    };

    // A response to a proxy-originated request (the `initialize` replay or
    // `tools/list` refresh issued by the Restart Controller) is consumed
    // here and never reaches the client — its id lives in a namespace the
    // client never sees requests from, so forwarding it would hand the
    // client an unsolicited response it can't correlate to anything it
    // asked for (`spec.md` §4.5).
    if let Some(RequestId::Number(n)) = protocol::id_of(&m) {
        if state.correlator.has_pending(n).await {
            state.correlator.resolve(n, m).await;
            return;
        }
    }

    if let Some(id) = protocol::id_of(&m) {
        if state.session.take_pending_tools_list(&id).await
            && m.get("result").and_then(|r| r.get("tools")).is_some()
        {
            let get_additional_tools = state.hooks.lock().await.get_additional_tools.clone();
            if let Some(hook) = get_additional_tools {
                match hook().await {
                    Ok(extra) => {
                        if let Some(tools) = m["result"]["tools"].as_array_mut() {
                            for tool in extra {
                                match serde_json::to_value(&tool) {
                                    Ok(v) => tools.push(v),
                                    Err(e) => tracing::warn!(error = %e, "failed to serialize extension tool"),
                                }
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "getAdditionalTools hook failed, forwarding without injection"),
                }
            }
        }
    }

    let after_hook = state.hooks.lock().await.after_stdout_receive.clone();
    if let Some(hook) = after_hook {
        match hook(m.clone()).await {
            Ok(modified) => m = modified,
            Err(e) => tracing::warn!(error = %e, "afterStdoutReceive hook failed, using original message"),
        }
    }

    if let Err(e) = state.write_to_client(&m).await {
        tracing::warn!(error = %e, "failed to write child message to client stdout");
    }
}
