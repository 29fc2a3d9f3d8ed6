//! Proxy configuration — assembled from CLI args and environment variables.
//!
//! Grounded on `src/config.rs` (teacher) for the shape of an immutable,
//! validated config struct with defaulted fields; the source here is CLI
//! args + `MCPMON_*` env vars rather than a TOML file, since the proxy keeps
//! no on-disk config.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Default debounce window applied to `restart()`.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 300;
/// Default pause between kill-complete and respawn.
pub const DEFAULT_KILL_DELAY_MS: u64 = 0;
/// Default pause between respawn and `initialize` replay.
pub const DEFAULT_READY_DELAY_MS: u64 = 300;

/// Immutable proxy configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub command: String,
    pub command_args: Vec<String>,
    pub watch_targets: HashSet<PathBuf>,
    pub env: HashMap<String, String>,
    pub restart_delay_ms: u64,
    pub kill_delay_ms: u64,
    pub ready_delay_ms: u64,
    pub session_id: String,
    pub verbose: bool,
}

impl ProxyConfig {
    /// Build a config for `command`/`command_args`, applying the
    /// `MCPMON_WATCH` / `MCPMON_DELAY` / `MCPMON_VERBOSE` environment
    /// variables over the given defaults. `session_id` must be generated by
    /// the caller (a fresh UUID per process lifetime).
    pub fn new(command: String, command_args: Vec<String>, session_id: String) -> Self {
        let watch_targets = std::env::var("MCPMON_WATCH")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let restart_delay_ms = std::env::var("MCPMON_DELAY")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_RESTART_DELAY_MS);

        let verbose = std::env::var("MCPMON_VERBOSE")
            .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            command,
            command_args,
            watch_targets,
            env: HashMap::new(),
            restart_delay_ms,
            kill_delay_ms: DEFAULT_KILL_DELAY_MS,
            ready_delay_ms: DEFAULT_READY_DELAY_MS,
            session_id,
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    /// `ProxyConfig::new` reads process-global env vars; the default test
    /// harness runs `#[test]`s in parallel on separate threads, so these two
    /// tests must not interleave their `set_var`/`remove_var` calls.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn test_new_defaults_without_env() {
        let _guard = env_lock().lock().unwrap();
        std::env::remove_var("MCPMON_WATCH");
        std::env::remove_var("MCPMON_DELAY");
        std::env::remove_var("MCPMON_VERBOSE");

        let config = ProxyConfig::new("node".into(), vec!["server.js".into()], "sess-1".into());
        assert!(config.watch_targets.is_empty());
        assert_eq!(config.restart_delay_ms, DEFAULT_RESTART_DELAY_MS);
        assert!(!config.verbose);
    }

    #[test]
    fn test_new_parses_watch_targets_and_delay() {
        let _guard = env_lock().lock().unwrap();
        std::env::set_var("MCPMON_WATCH", "src/index.js, src/lib.js");
        std::env::set_var("MCPMON_DELAY", "750");
        std::env::set_var("MCPMON_VERBOSE", "1");

        let config = ProxyConfig::new("node".into(), vec![], "sess-2".into());
        assert_eq!(config.watch_targets.len(), 2);
        assert!(config.watch_targets.contains(&PathBuf::from("src/index.js")));
        assert_eq!(config.restart_delay_ms, 750);
        assert!(config.verbose);

        std::env::remove_var("MCPMON_WATCH");
        std::env::remove_var("MCPMON_DELAY");
        std::env::remove_var("MCPMON_VERBOSE");
    }
}
