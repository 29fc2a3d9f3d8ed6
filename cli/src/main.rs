//! mcpmon — transparent hot-reload proxy for MCP servers over stdio.
//!
//! `mcpmon <command> [args…]` spawns `command` as the real MCP server, sits
//! between it and the client on stdio, and swaps it out in place whenever a
//! watched source file changes.

use std::sync::Arc;

use clap::Parser;
use mcpmon::{ExtensionRegistry, ProcessManager, ProxyConfig, ProxyState, TokioProcessManager};
use tracing_subscriber::EnvFilter;

/// mcpmon — transparent hot-reload proxy for MCP servers over stdio.
#[derive(Parser)]
#[command(
    name = "mcpmon",
    version,
    about = "Transparent hot-reload proxy for MCP servers over stdio"
)]
struct Cli {
    /// The command to run as the managed MCP server.
    command: String,

    /// Arguments passed through to the managed command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command_args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let verbose = std::env::var("MCPMON_VERBOSE")
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let session_id = uuid::Uuid::new_v4().to_string();
    let config = ProxyConfig::new(cli.command, cli.command_args, session_id);

    tracing::info!(command = %config.command, session_id = %config.session_id, "mcpmon starting");

    let process_manager: Arc<dyn ProcessManager> = Arc::new(TokioProcessManager);
    let state = Arc::new(ProxyState::new(config, process_manager, Box::new(tokio::io::stdout())));

    // Extensions register hooks once, before any traffic flows; their own
    // internal logic (large-response persistence, structured logging, etc.)
    // is out of scope here — only the registry/hook contract lives in this
    // crate (`spec.md` §1).
    let registry = ExtensionRegistry::new();
    match registry.initialize_all().await {
        Ok(hooks) => *state.hooks.lock().await = hooks,
        Err(e) => {
            tracing::error!(error = %e, "extension initialization failed");
            return 1;
        }
    }

    let state_for_signals = state.clone();
    tokio::spawn(async move {
        let interrupted = wait_for_shutdown_signal().await;
        tracing::info!(interrupted, "shutdown signal received");
        state_for_signals.request_shutdown();
    });

    mcpmon::supervisor::run(state.clone(), tokio::io::stdin()).await;

    registry.shutdown_all().await;

    tracing::info!("mcpmon stopped");
    if state.is_shutdown_requested() {
        130
    } else {
        0
    }
}

/// Waits for SIGINT or SIGTERM (Unix) / Ctrl-C (elsewhere). Returns which
/// kind of interruption occurred for logging. Shutdown itself is driven by
/// `ProxyState::request_shutdown`, which is idempotent — a second signal
/// while already shutting down is a no-op beyond this wait resolving again.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => true,
        _ = sigterm.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> bool {
    tokio::signal::ctrl_c().await.ok();
    true
}
