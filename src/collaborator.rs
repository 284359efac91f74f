//! Collaborator hooks: semantic lifecycle events the orchestrator emits at
//! plan and phase boundaries. Collaborator failures never abort a run —
//! the orchestrator only logs them and continues.

use crate::plan::Phase;
use async_trait::async_trait;
use tracing::{error, info};

#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn on_plan_start(&self, _plan_name: &str) {}
    async fn on_phase_start(&self, _phase: &Phase) {}
    async fn on_phase_complete(&self, _phase: &Phase) {}
    async fn on_phase_failed(&self, _phase: &Phase, _error: Option<&str>) {}
    async fn on_plan_complete(&self, _success: bool) {}
    async fn on_milestone_progress(&self, _done: usize, _total: usize) {}
}

/// Invoke a collaborator hook, swallowing and logging any panic-free error
/// path the hook itself might represent through its return value. Hooks on
/// this trait are infallible by signature; this helper exists for the
/// future case of a collaborator that reports failure via a side channel.
pub async fn notify_phase_failed(collaborator: &dyn Collaborator, phase: &Phase, error: Option<&str>) {
    collaborator.on_phase_failed(phase, error).await;
}

/// Default collaborator: logs every lifecycle event via `tracing` and does
/// nothing else. Ships in-tree; external sync/notification/TUI collaborators
/// are out of scope.
pub struct LoggingCollaborator;

#[async_trait]
impl Collaborator for LoggingCollaborator {
    async fn on_plan_start(&self, plan_name: &str) {
        info!(plan = plan_name, "plan start");
    }

    async fn on_phase_start(&self, phase: &Phase) {
        info!(phase = %phase.id, title = %phase.title, "phase start");
    }

    async fn on_phase_complete(&self, phase: &Phase) {
        info!(phase = %phase.id, "phase complete");
    }

    async fn on_phase_failed(&self, phase: &Phase, error: Option<&str>) {
        error!(phase = %phase.id, error = error.unwrap_or("unknown"), "phase failed");
    }

    async fn on_plan_complete(&self, success: bool) {
        info!(success, "plan complete");
    }

    async fn on_milestone_progress(&self, done: usize, total: usize) {
        info!(done, total, "milestone progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PhaseStatus;
    use std::path::PathBuf;

    fn phase() -> Phase {
        Phase {
            id: "1".into(),
            title: "Setup".into(),
            document_path: PathBuf::from("phases/1.md"),
            status: PhaseStatus::Pending,
            depends_on: vec![],
            gates: vec![],
            required_agents: vec![],
            required_steps: vec![],
            notes_input: None,
            notes_output: None,
        }
    }

    #[tokio::test]
    async fn logging_collaborator_does_not_panic_on_any_event() {
        let collaborator = LoggingCollaborator;
        collaborator.on_plan_start("Test Plan").await;
        collaborator.on_phase_start(&phase()).await;
        collaborator.on_phase_complete(&phase()).await;
        collaborator.on_phase_failed(&phase(), Some("boom")).await;
        collaborator.on_plan_complete(true).await;
        collaborator.on_milestone_progress(1, 2).await;
    }

    #[tokio::test]
    async fn default_trait_methods_are_no_ops() {
        struct Bare;
        #[async_trait]
        impl Collaborator for Bare {}
        let bare = Bare;
        bare.on_phase_start(&phase()).await;
    }
}
