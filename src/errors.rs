//! Typed error hierarchy for the orchestrator.
//!
//! Each subsystem raises its own enum; `OrchestratorError` unifies them via
//! `#[from]` and adds the outcomes only the top-level state machine can
//! reach (exhausted attempts, exhausted restarts, cancellation).

use std::path::PathBuf;
use thiserror::Error;

/// Structural failures in the plan itself: unparsable markdown, a missing
/// phase document, a phases table with no rows. All fatal before a run is
/// created.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("master plan not found: {path}")]
    MasterNotFound { path: PathBuf },

    #[error("failed to parse master plan at {path}")]
    MasterParseFailed {
        path: PathBuf,
        #[source]
        reason: anyhow::Error,
    },

    #[error("phase {id} document not found: {path}")]
    PhaseNotFound { id: String, path: PathBuf },

    #[error("failed to parse phase {id} document at {path}")]
    PhaseParseFailed {
        id: String,
        path: PathBuf,
        #[source]
        reason: anyhow::Error,
    },

    #[error("master plan has no phases")]
    NoPhases,
}

/// Failures spawning or running the worker subprocess.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process")]
    SpawnFailed(#[source] std::io::Error),

    #[error("worker timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("worker exited with code {code}")]
    NonZeroExit { code: i32 },
}

/// Failures from the persistent state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store error")]
    Database(#[source] rusqlite::Error),

    #[error("phase execution already exists: run={run_id} phase={phase_id} attempt={attempt}")]
    DuplicateExecution {
        run_id: String,
        phase_id: String,
        attempt: u32,
    },

    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },
}

impl From<rusqlite::Error> for StateStoreError {
    fn from(e: rusqlite::Error) -> Self {
        StateStoreError::Database(e)
    }
}

/// The top-level error type the Orchestrator surfaces. Lower layers tag
/// their own failures at the point they're raised; the Orchestrator never
/// raises anything outside this enum except cancellation, which is a
/// variant rather than a panic or process exit.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error("phase {phase_id} failed after {attempts} attempts")]
    MaxAttemptsExhausted { phase_id: String, attempts: u32 },

    #[error("phase {phase_id} exceeded max restarts ({restarts})")]
    MaxRestartsExhausted { phase_id: String, restarts: u32 },

    #[error("phase {phase_id} is awaiting human review")]
    AwaitingHuman { phase_id: String },

    #[error("working directory has tracked changes: {files:?}")]
    DirtyWorkingDirectory { files: Vec<PathBuf> },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_displays_path() {
        let err = PlanError::MasterNotFound {
            path: PathBuf::from("plan/MASTER.md"),
        };
        assert!(err.to_string().contains("MASTER.md"));
    }

    #[test]
    fn orchestrator_error_from_plan_error() {
        let plan_err = PlanError::NoPhases;
        let err: OrchestratorError = plan_err.into();
        assert!(matches!(err, OrchestratorError::Plan(PlanError::NoPhases)));
    }

    #[test]
    fn state_store_error_from_rusqlite() {
        let sqlite_err = rusqlite::Error::QueryReturnedNoRows;
        let err: StateStoreError = sqlite_err.into();
        assert!(matches!(err, StateStoreError::Database(_)));
    }

    #[test]
    fn max_attempts_exhausted_message() {
        let err = OrchestratorError::MaxAttemptsExhausted {
            phase_id: "2".to_string(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "phase 2 failed after 3 attempts");
    }

    #[test]
    fn implements_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        let err = OrchestratorError::Cancelled;
        assert_error(&err);
    }

    #[test]
    fn worker_error_timeout_carries_seconds() {
        let err = WorkerError::Timeout { seconds: 1800 };
        assert!(err.to_string().contains("1800"));
    }
}
