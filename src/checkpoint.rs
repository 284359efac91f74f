//! Checkpoint Manager: accumulates progress milestones a worker records
//! during a phase and, on a context-limit restart, synthesizes a
//! resumption preamble to prepend to the next attempt's prompt.

#[derive(Debug, Default)]
pub struct CheckpointManager {
    phase_id: String,
    milestones: Vec<String>,
}

impl CheckpointManager {
    pub fn new(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            milestones: Vec::new(),
        }
    }

    pub fn record_milestone(&mut self, step: impl Into<String>) {
        self.milestones.push(step.into());
    }

    pub fn milestones(&self) -> &[String] {
        &self.milestones
    }

    /// Build the resumption preamble for the next attempt. Does not clear
    /// milestones — that only happens on phase completion via [`Self::clear`].
    pub fn prepare_restart(&self) -> String {
        if self.milestones.is_empty() {
            format!(
                "Resuming phase {} after a context-window restart. No prior progress was recorded — start from the beginning of the phase document.",
                self.phase_id
            )
        } else {
            format!(
                "Resuming phase {} after a context-window restart. Already completed: {}. Continue from here — do not redo completed work.",
                self.phase_id,
                self.milestones.join(", ")
            )
        }
    }

    /// Clear accumulated milestones. Called when the phase reaches a
    /// terminal COMPLETED status; the durable progress log itself is never
    /// deleted (the State Store keeps that as the audit trail).
    pub fn clear(&mut self) {
        self.milestones.clear();
    }
}
