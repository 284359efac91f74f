//! Plan model: the in-memory representation of a master plan and its
//! phases, loaded from markdown by [`parser`].

pub mod parser;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use parser::{load_plan, GATE_COMMANDS};

/// The six process-wrapper steps a phase document can declare. Carried as
/// an enum rather than a raw string so the compliance checker's step table
/// (see [`crate::compliance::STEP_PATTERNS`]) can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequiredStep {
    ReadPreviousNotes,
    DocSyncManager,
    Implementation,
    PreValidation,
    TaskValidator,
    WriteNotes,
}

impl RequiredStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredStep::ReadPreviousNotes => "read_previous_notes",
            RequiredStep::DocSyncManager => "doc_sync_manager",
            RequiredStep::Implementation => "implementation",
            RequiredStep::PreValidation => "pre_validation",
            RequiredStep::TaskValidator => "task_validator",
            RequiredStep::WriteNotes => "write_notes",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read_previous_notes" => Some(RequiredStep::ReadPreviousNotes),
            "doc_sync_manager" => Some(RequiredStep::DocSyncManager),
            "implementation" => Some(RequiredStep::Implementation),
            "pre_validation" => Some(RequiredStep::PreValidation),
            "task_validator" => Some(RequiredStep::TaskValidator),
            "write_notes" => Some(RequiredStep::WriteNotes),
            _ => None,
        }
    }
}

/// Declared status of a phase as read off the master plan's phases table.
/// Purely advisory: the State Store's completed-phases set is the source
/// of truth for skip decisions (see [`crate::orchestrator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl PhaseStatus {
    fn from_str(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "completed" | "done" | "✅" => PhaseStatus::Completed,
            "in progress" | "in-progress" | "running" => PhaseStatus::InProgress,
            "blocked" => PhaseStatus::Blocked,
            _ => PhaseStatus::Pending,
        }
    }
}

/// A single shell-command gate declared by a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub name: String,
    pub command: String,
    pub blocking: bool,
}

/// One phase in a plan: a markdown document plus the metadata the parser
/// extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub document_path: PathBuf,
    pub status: PhaseStatus,
    pub depends_on: Vec<String>,
    pub gates: Vec<Gate>,
    pub required_agents: Vec<String>,
    pub required_steps: Vec<RequiredStep>,
    pub notes_input: Option<PathBuf>,
    pub notes_output: Option<PathBuf>,
}

impl Phase {
    pub fn has_dependency_on(&self, other: &str) -> bool {
        self.depends_on.iter().any(|d| d == other)
    }
}

/// A fully loaded plan: a human name, its phases in document order, and
/// any opaque external-issue references surfaced for sync collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub master_path: PathBuf,
    pub phases: Vec<Phase>,
    pub github_issues: Option<String>,
    pub github_repo: Option<String>,
    pub jira_issues: Option<String>,
}

impl Plan {
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_ids(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_status_parses_case_insensitively() {
        assert_eq!(PhaseStatus::from_str("Completed"), PhaseStatus::Completed);
        assert_eq!(PhaseStatus::from_str("COMPLETED"), PhaseStatus::Completed);
        assert_eq!(PhaseStatus::from_str("unknown"), PhaseStatus::Pending);
    }

    #[test]
    fn required_step_round_trips() {
        for step in [
            RequiredStep::ReadPreviousNotes,
            RequiredStep::DocSyncManager,
            RequiredStep::Implementation,
            RequiredStep::PreValidation,
            RequiredStep::TaskValidator,
            RequiredStep::WriteNotes,
        ] {
            assert_eq!(RequiredStep::from_str(step.as_str()), Some(step));
        }
        assert_eq!(RequiredStep::from_str("bogus"), None);
    }

    #[test]
    fn phase_has_dependency_on() {
        let phase = Phase {
            id: "2".into(),
            title: "T".into(),
            document_path: PathBuf::from("p.md"),
            status: PhaseStatus::Pending,
            depends_on: vec!["1".into()],
            gates: vec![],
            required_agents: vec![],
            required_steps: vec![],
            notes_input: None,
            notes_output: None,
        };
        assert!(phase.has_dependency_on("1"));
        assert!(!phase.has_dependency_on("3"));
    }
}
