//! Worker Runner: spawns the code-generation worker subprocess for a phase
//! (or remediation) attempt, streams its output through the Stream Parser,
//! watches the Context Estimator for a restart signal, and reports back an
//! [`ExecutionResult`].

use crate::config::DebussyConfig;
use crate::context::ContextEstimator;
use crate::errors::WorkerError;
use crate::plan::Phase;
use crate::stream::{ParserCallbacks, StreamParser, TokenStats};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

/// Session-log sentinel marking a cooperative context-limit restart rather
/// than a genuine failure. The orchestrator checks for this prefix to decide
/// whether to commit a no-op and re-invoke with a checkpoint preamble.
pub const CONTEXT_LIMIT_RESTART: &str = "CONTEXT_LIMIT_RESTART";

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub session_log: String,
    pub exit_code: i32,
    pub duration_secs: u64,
    pub pid: Option<u32>,
}

pub struct WorkerRunner {
    claude_cmd: String,
    claude_flags: Vec<String>,
    project_dir: PathBuf,
    phase_timeout: Duration,
}

impl WorkerRunner {
    pub fn new(config: &DebussyConfig) -> Self {
        Self {
            claude_cmd: config.claude_cmd.clone(),
            claude_flags: config.claude_flags(),
            project_dir: config.project_dir.clone(),
            phase_timeout: Duration::from_secs(config.phase_timeout_secs),
        }
    }

    /// Run one attempt: spawn the worker, stream stdout through the parser
    /// while stderr is copied verbatim to the log prefixed `[ERR] `, and
    /// return once the process exits, the phase timeout elapses, or the
    /// context estimator requests a restart.
    pub async fn run(
        &self,
        prompt: &str,
        log_path: &Path,
        estimator: &mut ContextEstimator,
    ) -> Result<ExecutionResult, WorkerError> {
        let start = Instant::now();

        let mut child = Command::new(&self.claude_cmd)
            .args(&self.claude_flags)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let pid = child.id();

        let mut stdin = child.stdin.take().expect("stdin piped at spawn");
        let prompt_owned = prompt.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt_owned.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let stdout = child.stdout.take().expect("stdout piped at spawn");
        let stderr = child.stderr.take().expect("stderr piped at spawn");
        let mut log_file = tokio::fs::File::create(log_path).await.ok();

        let mut parser = StreamParser::new();
        let mut last_tool_count = 0u64;
        let mut restarted = false;

        let stream_result = timeout(self.phase_timeout, async {
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();
            let mut stdout_done = false;
            let mut stderr_done = false;

            loop {
                if stdout_done && stderr_done {
                    break;
                }
                tokio::select! {
                    line = stdout_lines.next_line(), if !stdout_done => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(file) = log_file.as_mut() {
                                    let _ = file.write_all(line.as_bytes()).await;
                                    let _ = file.write_all(b"\n").await;
                                }
                                process_line(&line, &mut parser, estimator, &mut last_tool_count);
                                if estimator.should_restart() {
                                    restarted = true;
                                    break;
                                }
                            }
                            Ok(None) | Err(_) => stdout_done = true,
                        }
                    }
                    line = stderr_lines.next_line(), if !stderr_done => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(file) = log_file.as_mut() {
                                    let _ = file.write_all(format!("[ERR] {line}\n").as_bytes()).await;
                                }
                            }
                            Ok(None) | Err(_) => stderr_done = true,
                        }
                    }
                }
            }
        })
        .await;

        let duration_secs = start.elapsed().as_secs();

        if restarted {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Ok(ExecutionResult {
                success: false,
                session_log: format!("{CONTEXT_LIMIT_RESTART}\n{}", parser.full_text()),
                exit_code: -2,
                duration_secs,
                pid,
            });
        }

        if stream_result.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(WorkerError::Timeout {
                seconds: self.phase_timeout.as_secs(),
            });
        }

        let status = child.wait().await.map_err(WorkerError::SpawnFailed)?;
        let exit_code = status.code().unwrap_or(-1);

        Ok(ExecutionResult {
            success: status.success(),
            session_log: parser.full_text().to_string(),
            exit_code,
            duration_secs,
            pid,
        })
    }
}

fn process_line(
    line: &str,
    parser: &mut StreamParser,
    estimator: &mut ContextEstimator,
    last_tool_count: &mut u64,
) {
    let mut stats_seen: Option<TokenStats> = None;
    {
        let mut cb = ParserCallbacks {
            on_token_stats: Some(Box::new(|stats: &TokenStats| stats_seen = Some(stats.clone()))),
            ..Default::default()
        };
        parser.parse_line(line, &mut cb);
    }

    if let Some(stats) = stats_seen {
        estimator.record_stats(&stats);
    }

    let current = parser.tool_call_count;
    if current > *last_tool_count {
        for _ in 0..(current - *last_tool_count) {
            estimator.record_tool_call();
        }
        *last_tool_count = current;
    }
}

/// Prompt for a fresh attempt at a phase.
pub fn phase_prompt(phase: &Phase) -> String {
    let mut sections = vec![format!(
        "Work through the phase document at `{}`.",
        phase.document_path.display()
    )];

    if let Some(input) = &phase.notes_input {
        sections.push(format!("Read prior phase notes at `{}` before starting.", input.display()));
    }

    if !phase.required_agents.is_empty() {
        sections.push(format!(
            "Invoke these agents via the Task tool — never inline their work yourself: {}.",
            phase.required_agents.join(", ")
        ));
    }

    if let Some(output) = &phase.notes_output {
        sections.push(format!(
            "Write your notes to `{}` with `## Summary`, `## Key Decisions`, and `## Files Modified` sections.",
            output.display()
        ));
    }

    sections.push(format!(
        "When the phase is complete, signal it by running the completion CLI command for phase {}.",
        phase.id
    ));

    sections.join("\n\n")
}

/// Prompt for a remediation attempt: one action line per compliance issue,
/// prepended ahead of the original phase instructions.
pub fn remediation_prompt(phase: &Phase, issue_lines: &[String]) -> String {
    let mut sections = vec![
        "The previous attempt at this phase did not fully comply with its requirements. Address each of the following before signaling completion again:".to_string(),
    ];
    sections.extend(issue_lines.iter().cloned());
    sections.push(String::new());
    sections.push(phase_prompt(phase));
    sections.join("\n")
}

/// Build one remediation action line per compliance issue kind, following
/// the canonical phrasing the orchestrator's prompt expects.
pub fn issue_action_line(issue: &crate::compliance::ComplianceIssue) -> String {
    use crate::compliance::IssueKind;
    match issue.kind {
        IssueKind::AgentSkipped => format!("- {}", issue.details),
        IssueKind::StepSkipped => format!("- {}", issue.details),
        IssueKind::GatesFailed => format!("- Fix failing gate: {}", issue.details),
        IssueKind::NotesMissing | IssueKind::NotesIncomplete => format!("- {}", issue.details),
    }
}
