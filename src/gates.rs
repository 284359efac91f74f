//! Gate Runner: executes a phase's declared shell-command gates in
//! declaration order, stopping at the first blocking failure.

use crate::plan::Gate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const MAX_OUTPUT_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub command: String,
    pub passed: bool,
    pub output: String,
}

pub struct GateRunner {
    project_root: std::path::PathBuf,
    gate_timeout: Duration,
}

impl GateRunner {
    pub fn new(project_root: impl AsRef<Path>, gate_timeout: Duration) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            gate_timeout,
        }
    }

    /// Run every gate for a phase in order, stopping at the first blocking
    /// failure. Returns `(all_passed, results)` for every gate actually run.
    pub async fn verify_all_gates_pass(&self, gates: &[Gate]) -> (bool, Vec<GateResult>) {
        let mut results = Vec::with_capacity(gates.len());

        for gate in gates {
            let result = self.run_gate(gate).await;
            let failed_blocking = !result.passed && gate.blocking;
            results.push(result);
            if failed_blocking {
                break;
            }
        }

        let all_passed = results.iter().all(|r| r.passed);
        (all_passed, results)
    }

    async fn run_gate(&self, gate: &Gate) -> GateResult {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&gate.command)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return GateResult {
                    name: gate.name.clone(),
                    command: gate.command.clone(),
                    passed: false,
                    output: format!("failed to spawn gate command: {e}"),
                };
            }
        };

        match timeout(self.gate_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                GateResult {
                    name: gate.name.clone(),
                    command: gate.command.clone(),
                    passed: output.status.success(),
                    output: truncate(&combined, MAX_OUTPUT_CHARS),
                }
            }
            Ok(Err(e)) => GateResult {
                name: gate.name.clone(),
                command: gate.command.clone(),
                passed: false,
                output: format!("failed to wait for gate command: {e}"),
            },
            Err(_) => GateResult {
                name: gate.name.clone(),
                command: gate.command.clone(),
                passed: false,
                output: format!("TIMEOUT after {} seconds", self.gate_timeout.as_secs()),
            },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... (truncated)", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate(name: &str, command: &str) -> Gate {
        Gate {
            name: name.to_string(),
            command: command.to_string(),
            blocking: true,
        }
    }

    #[tokio::test]
    async fn passing_gate_succeeds() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path(), Duration::from_secs(5));
        let (passed, results) = runner.verify_all_gates_pass(&[gate("ok", "exit 0")]).await;
        assert!(passed);
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn failing_blocking_gate_stops_run() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path(), Duration::from_secs(5));
        let gates = vec![gate("fails", "exit 1"), gate("never_runs", "exit 0")];
        let (passed, results) = runner.verify_all_gates_pass(&gates).await;
        assert!(!passed);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn non_blocking_gate_does_not_stop_run() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path(), Duration::from_secs(5));
        let gates = vec![
            Gate {
                name: "soft".into(),
                command: "exit 1".into(),
                blocking: false,
            },
            gate("ok", "exit 0"),
        ];
        let (passed, results) = runner.verify_all_gates_pass(&gates).await;
        assert!(!passed);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn gate_timeout_produces_timeout_output() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path(), Duration::from_millis(200));
        let (passed, results) = runner.verify_all_gates_pass(&[gate("slow", "sleep 5")]).await;
        assert!(!passed);
        assert!(results[0].output.contains("TIMEOUT"));
    }

    #[tokio::test]
    async fn gate_captures_output() {
        let dir = tempdir().unwrap();
        let runner = GateRunner::new(dir.path(), Duration::from_secs(5));
        let (_, results) = runner
            .verify_all_gates_pass(&[gate("echo", "echo hello")])
            .await;
        assert!(results[0].output.contains("hello"));
    }
}
