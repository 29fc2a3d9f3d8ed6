//! Container-aware spawn/kill path (§4.4, §4.6).
//!
//! Grounded on `src/server/stdio.rs`'s use of raw `tokio::process::Command`
//! for subprocess control (teacher), applied here to the `docker`
//! side-commands `spec.md` specifies rather than to the managed MCP server
//! itself.

use tokio::process::Command;

use crate::error::{ProxyError, Result};

/// The four labels injected into `docker run` invocations, bit-exact per
/// `spec.md` §6.
pub struct ContainerLabels {
    pub session_id: String,
    pub proxy_pid: u32,
    pub started_unix_ms: u128,
}

impl ContainerLabels {
    fn as_label_args(&self) -> Vec<String> {
        vec![
            "mcpmon.managed=true".to_string(),
            format!("mcpmon.session={}", self.session_id),
            format!("mcpmon.pid={}", self.proxy_pid),
            format!("mcpmon.started={}", self.started_unix_ms),
        ]
    }
}

/// True if `command` is `"docker"` and the first non-flag argument is
/// `"run"` — the condition under which label injection and the
/// container-aware kill path apply (`spec.md` §4.4).
pub fn is_docker_run(command: &str, args: &[String]) -> bool {
    if command != "docker" {
        return false;
    }
    args.iter()
        .find(|a| !a.starts_with('-'))
        .is_some_and(|first| first == "run")
}

/// Inject the four `mcpmon.*` labels immediately after the literal `"run"`
/// argument. No detach flag is added — stdio must remain attached.
pub fn inject_labels(args: &mut Vec<String>, labels: &ContainerLabels) {
    let Some(run_pos) = args.iter().position(|a| a == "run") else {
        return;
    };
    let mut insert_at = run_pos + 1;
    for label in labels.as_label_args() {
        args.insert(insert_at, "--label".to_string());
        args.insert(insert_at + 1, label);
        insert_at += 2;
    }
}

/// Best-effort side query to capture the container id for a just-spawned
/// `docker run` process, via its session label. Failure to capture is
/// non-fatal — returns `None`.
pub async fn capture_container_id(session_id: &str) -> Option<String> {
    let output = Command::new("docker")
        .args([
            "ps",
            "-q",
            "--latest",
            "--filter",
            &format!("label=mcpmon.session={session_id}"),
        ])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// `docker stop -t 10 <id>`, falling back to `docker kill <id>` on failure.
/// Both steps log but never propagate errors — the local-process signal
/// path and liveness check still apply regardless (`spec.md` §4.6).
pub async fn stop_container(container_id: &str) {
    let stop = Command::new("docker")
        .args(["stop", "-t", "10", container_id])
        .output()
        .await;

    match stop {
        Ok(output) if output.status.success() => return,
        Ok(output) => {
            tracing::warn!(
                container_id,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "docker stop failed, falling back to docker kill"
            );
        }
        Err(e) => {
            tracing::warn!(container_id, error = %e, "docker stop failed to run, falling back to docker kill");
        }
    }

    if let Err(e) = run_docker_kill(container_id).await {
        tracing::warn!(container_id, error = %e, "docker kill also failed");
    }
}

async fn run_docker_kill(container_id: &str) -> Result<()> {
    let output = Command::new("docker")
        .args(["kill", container_id])
        .output()
        .await
        .map_err(|e| ProxyError::ContainerCommandFailed("kill".into(), e.to_string()))?;
    if !output.status.success() {
        return Err(ProxyError::ContainerCommandFailed(
            "kill".into(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_docker_run_true() {
        assert!(is_docker_run("docker", &["run".into(), "myimage".into()]));
    }

    #[test]
    fn test_is_docker_run_false_for_other_subcommand() {
        assert!(!is_docker_run("docker", &["ps".into()]));
    }

    #[test]
    fn test_is_docker_run_false_for_other_command() {
        assert!(!is_docker_run("node", &["server.js".into()]));
    }

    #[test]
    fn test_is_docker_run_skips_leading_flags() {
        assert!(is_docker_run("docker", &["-D".into(), "run".into(), "img".into()]));
    }

    #[test]
    fn test_inject_labels_immediately_after_run() {
        let mut args = vec!["run".to_string(), "--rm".to_string(), "myimage".to_string()];
        let labels = ContainerLabels {
            session_id: "abc-123".into(),
            proxy_pid: 4242,
            started_unix_ms: 1_700_000_000_000,
        };
        inject_labels(&mut args, &labels);

        assert_eq!(
            args,
            vec![
                "run",
                "--label",
                "mcpmon.managed=true",
                "--label",
                "mcpmon.session=abc-123",
                "--label",
                "mcpmon.pid=4242",
                "--label",
                "mcpmon.started=1700000000000",
                "--rm",
                "myimage",
            ]
        );
    }

    #[test]
    fn test_inject_labels_no_run_token_is_noop() {
        let mut args = vec!["ps".to_string()];
        let labels = ContainerLabels {
            session_id: "x".into(),
            proxy_pid: 1,
            started_unix_ms: 0,
        };
        inject_labels(&mut args, &labels);
        assert_eq!(args, vec!["ps"]);
    }

    #[test]
    fn test_no_detach_flag_added() {
        let mut args = vec!["run".to_string(), "myimage".to_string()];
        let labels = ContainerLabels {
            session_id: "x".into(),
            proxy_pid: 1,
            started_unix_ms: 0,
        };
        inject_labels(&mut args, &labels);
        assert!(!args.iter().any(|a| a == "-d" || a == "--detach"));
    }
}
