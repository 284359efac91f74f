//! Orchestrator: the top-level state machine. Walks a plan's phases in
//! document order, drives each through attempt/restart/compliance cycles,
//! and commits tracked changes at phase boundaries.

use crate::audit::audit_plan;
use crate::checkpoint::CheckpointManager;
use crate::collaborator::Collaborator;
use crate::compliance::{CompletionReport, ComplianceChecker, RemediationStrategy};
use crate::config::DebussyConfig;
use crate::context::ContextEstimator;
use crate::errors::OrchestratorError;
use crate::gates::GateRunner;
use crate::plan::Plan;
use crate::state::{PhaseExecutionStatus, RunStatus, StateStore};
use crate::tracker::git::GitTracker;
use crate::worker::{self, WorkerRunner, CONTEXT_LIMIT_RESTART};
use anyhow::anyhow;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

const ICON_COMPLETED: &str = "\u{2705}";
const ICON_WARN: &str = "\u{26A0}\u{FE0F}";
const ICON_RESTART: &str = "\u{1F501}";

pub struct RunOptions<'a> {
    pub only_phase: Option<&'a str>,
    pub dry_run: bool,
    pub allow_dirty: bool,
    pub auto_commit: bool,
    pub skip: HashSet<String>,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            only_phase: None,
            dry_run: false,
            allow_dirty: false,
            auto_commit: true,
            skip: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped,
    Failed(String),
    AwaitingHuman,
}

pub struct Orchestrator {
    config: DebussyConfig,
    state: StateStore,
    gate_runner: GateRunner,
    worker_runner: WorkerRunner,
    git: Option<GitTracker>,
    collaborator: Box<dyn Collaborator>,
}

impl Orchestrator {
    pub fn new(config: DebussyConfig, state: StateStore, collaborator: Box<dyn Collaborator>) -> Self {
        let gate_runner = GateRunner::new(&config.project_dir, std::time::Duration::from_secs(config.gate_timeout_secs));
        let worker_runner = WorkerRunner::new(&config);
        let git = GitTracker::new(&config.project_dir).ok();
        Self {
            config,
            state,
            gate_runner,
            worker_runner,
            git,
            collaborator,
        }
    }

    #[instrument(skip_all, fields(plan = %plan.name))]
    pub async fn run(&self, plan: &Plan, opts: RunOptions<'_>) -> Result<(), OrchestratorError> {
        let audit = audit_plan(plan);
        if !audit.passed {
            let messages: Vec<String> = audit
                .issues
                .iter()
                .filter(|i| i.severity == crate::audit::IssueSeverity::Error)
                .map(|i| i.message.clone())
                .collect();
            return Err(OrchestratorError::Other(anyhow!(
                "plan audit failed: {}",
                messages.join("; ")
            )));
        }

        if !opts.allow_dirty {
            if let Some(git) = &self.git {
                let tracked = git.tracked_changes().map_err(OrchestratorError::Other)?;
                if !tracked.is_empty() {
                    return Err(OrchestratorError::DirtyWorkingDirectory { files: tracked.into_iter().map(PathBuf::from).collect() });
                }
            }
        }

        let plan_path = plan.master_path.to_string_lossy().to_string();
        let run_id = match self.state.find_resumable_run(&plan_path)? {
            Some(existing) if existing.status != RunStatus::Completed => existing.id,
            _ => self.state.create_run(&plan_path)?,
        };
        self.state.update_run_status(&run_id, RunStatus::Running)?;
        self.collaborator.on_plan_start(&plan.name).await;

        let mut skip: HashSet<String> = opts.skip.clone();
        skip.extend(self.state.get_completed_phases(&run_id)?);

        let total = plan.phases.len();
        let mut done = skip.len().min(total);
        let mut overall_success = true;

        for phase in &plan.phases {
            if let Some(only) = opts.only_phase {
                if phase.id != only {
                    continue;
                }
            }
            if skip.contains(&phase.id) {
                continue;
            }

            let deps_met = phase.depends_on.iter().all(|d| skip.contains(d));
            if !deps_met {
                warn!(phase = %phase.id, "dependencies not met, skipping for this run");
                continue;
            }

            if opts.dry_run {
                info!(phase = %phase.id, "dry run: would execute phase");
                continue;
            }

            self.state.set_current_phase(&run_id, Some(&phase.id))?;
            self.collaborator.on_phase_start(phase).await;

            let outcome = self.execute_phase(&run_id, phase, opts.auto_commit).await?;

            match outcome {
                PhaseOutcome::Completed => {
                    skip.insert(phase.id.clone());
                    done += 1;
                    self.collaborator.on_phase_complete(phase).await;
                    self.collaborator.on_milestone_progress(done, total).await;
                }
                PhaseOutcome::Skipped => {}
                PhaseOutcome::Failed(reason) => {
                    overall_success = false;
                    self.collaborator.on_phase_failed(phase, Some(&reason)).await;
                    self.state.update_run_status(&run_id, RunStatus::Failed)?;
                    self.collaborator.on_plan_complete(false).await;
                    return Err(OrchestratorError::MaxAttemptsExhausted {
                        phase_id: phase.id.clone(),
                        attempts: self.state.get_attempt_count(&run_id, &phase.id)?,
                    });
                }
                PhaseOutcome::AwaitingHuman => {
                    overall_success = false;
                    self.state.update_run_status(&run_id, RunStatus::Paused)?;
                    self.collaborator.on_plan_complete(false).await;
                    return Err(OrchestratorError::AwaitingHuman { phase_id: phase.id.clone() });
                }
            }
        }

        self.state.set_current_phase(&run_id, None)?;
        self.state
            .update_run_status(&run_id, if overall_success { RunStatus::Completed } else { RunStatus::Failed })?;
        self.collaborator.on_plan_complete(overall_success).await;

        Ok(())
    }

    async fn execute_phase(
        &self,
        run_id: &str,
        phase: &crate::plan::Phase,
        auto_commit: bool,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let max_attempts = self.config.max_attempts();
        let mut issue_lines: Vec<String> = Vec::new();
        let checker = ComplianceChecker::new(&self.gate_runner);

        for attempt in 1..=max_attempts {
            self.state.create_phase_execution(run_id, &phase.id, attempt)?;
            self.state
                .update_phase_status(run_id, &phase.id, PhaseExecutionStatus::Running, None)?;

            let prompt = if issue_lines.is_empty() {
                worker::phase_prompt(phase)
            } else {
                worker::remediation_prompt(phase, &issue_lines)
            };

            let log_path = self.config.log_dir.join(format!("run_{run_id}_phase_{}_attempt_{attempt}.log", phase.id));
            let result = self.execute_with_restart(phase, &prompt, &log_path, auto_commit).await?;

            if let Some(pid) = result.pid {
                self.state.set_phase_pid(run_id, &phase.id, pid)?;
            }
            self.state.set_phase_log_path(run_id, &phase.id, &log_path.to_string_lossy())?;
            self.state
                .update_phase_status(run_id, &phase.id, PhaseExecutionStatus::Validating, None)?;

            let report = self.state.get_completion_signal(run_id, &phase.id)?.and_then(|sig| {
                sig.report.as_deref().and_then(|r| serde_json::from_str::<CompletionReport>(r).ok())
            });

            let compliance = checker.check(phase, &result.session_log, report.as_ref()).await;

            if let Some(exec_id) = self.state.latest_execution_id(run_id, &phase.id)? {
                for gate_result in &compliance.gate_results {
                    self.state.record_gate_result(exec_id, gate_result)?;
                }
            }

            match compliance.strategy {
                RemediationStrategy::WarnAndAccept => {
                    self.state
                        .update_phase_status(run_id, &phase.id, PhaseExecutionStatus::Completed, None)?;
                    let icon = if compliance.passed { ICON_COMPLETED } else { ICON_WARN };
                    self.maybe_commit(phase, icon, auto_commit)?;
                    return Ok(PhaseOutcome::Completed);
                }
                RemediationStrategy::TargetedFix | RemediationStrategy::FullRetry => {
                    issue_lines = compliance.issues.iter().map(worker::issue_action_line).collect();
                    let message = format!("attempt {attempt} failed compliance: {} issue(s)", compliance.issues.len());
                    self.state
                        .update_phase_status(run_id, &phase.id, PhaseExecutionStatus::Failed, Some(&message))?;
                    if attempt == max_attempts {
                        return Ok(PhaseOutcome::Failed(format!("max attempts reached: {message}")));
                    }
                }
                RemediationStrategy::HumanRequired => {
                    self.state
                        .update_phase_status(run_id, &phase.id, PhaseExecutionStatus::AwaitingHuman, None)?;
                    return Ok(PhaseOutcome::AwaitingHuman);
                }
            }
        }

        Ok(PhaseOutcome::Failed(format!("phase {} failed after {max_attempts} attempts", phase.id)))
    }

    /// Drive a single attempt, re-invoking the worker with a checkpoint
    /// preamble each time the context estimator calls for a restart, bounded
    /// by `max_restarts`.
    async fn execute_with_restart(
        &self,
        phase: &crate::plan::Phase,
        initial_prompt: &str,
        log_path: &PathBuf,
        auto_commit: bool,
    ) -> Result<crate::worker::ExecutionResult, OrchestratorError> {
        let mut checkpoint = CheckpointManager::new(&phase.id);
        let mut estimator = ContextEstimator::new(self.config.context_threshold_pct, self.config.tool_call_threshold);
        let mut prompt = initial_prompt.to_string();

        for restart in 0..=self.config.max_restarts {
            estimator.reset();
            let result = self
                .worker_runner
                .run(&prompt, log_path, &mut estimator)
                .await
                .map_err(OrchestratorError::from)?;

            if !result.session_log.starts_with(CONTEXT_LIMIT_RESTART) {
                return Ok(result);
            }

            if restart == self.config.max_restarts {
                return Err(OrchestratorError::MaxRestartsExhausted {
                    phase_id: phase.id.clone(),
                    restarts: self.config.max_restarts,
                });
            }

            self.maybe_commit(phase, ICON_RESTART, auto_commit)?;
            let preamble = checkpoint.prepare_restart();
            prompt = format!("{preamble}\n\n---\n\n{initial_prompt}");
        }

        unreachable!("loop always returns before exhausting restarts")
    }

    fn maybe_commit(&self, phase: &crate::plan::Phase, icon: &str, auto_commit: bool) -> Result<(), OrchestratorError> {
        if !auto_commit {
            return Ok(());
        }
        if let Some(git) = &self.git {
            git.commit_phase_boundary(&phase.id, &phase.title, icon, &self.config.model)
                .map_err(OrchestratorError::Other)?;
        }
        Ok(())
    }
}
