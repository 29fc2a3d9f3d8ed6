//! Process Manager contract (C1, `spec.md` §2/§6) — spawns a child given
//! `(command, args, env)` and exposes its stdio as byte streams plus a
//! status future.
//!
//! Grounded on `src/server/stdio.rs`'s `spawn_stdio_child` (teacher): a raw
//! `tokio::process::Command`, never a shell, all three stdio streams piped.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::error::{ProxyError, Result};

/// Spawns child processes. An object-safe trait so the Supervisor and
/// Restart Controller depend on the Process Manager *contract* (`spec.md`
/// treats it as an external collaborator) rather than directly on
/// `tokio::process`.
pub trait ProcessManager: Send + Sync {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<ChildHandle>;
}

/// The one-at-a-time child handle (`spec.md` §3 Invariant 1). Owns the
/// `tokio::process::Child` for `wait`/`kill`; stdin/stdout/stderr are taken
/// out at spawn time so Pump A/B/C can own them directly without contending
/// on a shared lock for every read.
pub struct ChildHandle {
    pub pid: u32,
    pub stdin: ChildStdin,
    /// Taken by the caller immediately after spawn to hand off to Pump B.
    pub stdout: Option<ChildStdout>,
    /// Taken by the caller immediately after spawn to hand off to Pump C.
    pub stderr: Option<ChildStderr>,
    /// Best-effort secondary handle set by the container-aware kill path
    /// (§4.4/§4.6). The process handle below remains authoritative.
    pub container_id: Option<String>,
    child: Child,
}

impl ChildHandle {
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Force-kill (SIGKILL on Unix) and reap the process.
    pub async fn force_kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Send a graceful termination signal (SIGTERM on Unix; `start_kill` —
    /// the only option tokio exposes — elsewhere).
    pub fn terminate_gracefully(&self) {
        #[cfg(unix)]
        {
            // SAFETY: `self.pid` is a valid pid obtained from this `Child`.
            unsafe {
                libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            // No graceful-signal concept off Unix; escalate straight to the
            // watchdog's force-kill path.
        }
    }

    /// Liveness probe: true if the pid still exists (`kill(pid, 0)` on
    /// Unix). Used after the graceful-kill watchdog to verify the process is
    /// actually gone (`spec.md` §4.3 step 2).
    pub fn is_alive(&self) -> bool {
        #[cfg(unix)]
        {
            // SAFETY: signal 0 performs no action beyond existence/permission
            // checks.
            unsafe { libc::kill(self.pid as libc::pid_t, 0) == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

/// Default `ProcessManager` backed directly by `tokio::process::Command`.
pub struct TokioProcessManager;

impl ProcessManager for TokioProcessManager {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<ChildHandle> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.envs(env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Backstop for P8 if this process ever exits without running the
        // supervisor's own kill path (panic, unhandled signal): tokio kills
        // the child when the last `Child` handle drops.
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProxyError::SpawnFailed(command.to_string(), e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| ProxyError::SpawnFailed(command.to_string(), "no pid after spawn".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProxyError::PipeUnavailable("stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProxyError::PipeUnavailable("stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProxyError::PipeUnavailable("stderr".into()))?;

        Ok(ChildHandle {
            pid,
            stdin,
            stdout: Some(stdout),
            stderr: Some(stderr),
            container_id: None,
            child,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_bad_command_is_spawn_failed() {
        let manager = TokioProcessManager;
        let result = manager.spawn("/this/command/does/not/exist-mcpmon", &[], &HashMap::new());
        assert!(matches!(result, Err(ProxyError::SpawnFailed(_, _))));
    }

    #[tokio::test]
    async fn test_spawn_and_wait_echo() {
        let manager = TokioProcessManager;
        let mut handle = manager
            .spawn("true", &[], &HashMap::new())
            .expect("spawn true");
        let status = handle.wait().await.expect("wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_force_kill_long_running_process() {
        let manager = TokioProcessManager;
        let mut handle = manager
            .spawn("sleep", &["5".to_string()], &HashMap::new())
            .expect("spawn sleep");
        handle.force_kill().await.expect("kill");
        let status = handle.wait().await.expect("wait after kill");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_liveness_probe_false_after_wait() {
        let manager = TokioProcessManager;
        let mut handle = manager.spawn("true", &[], &HashMap::new()).expect("spawn true");
        handle.wait().await.expect("wait");
        assert!(!handle.is_alive());
    }
}
