//! State Store: durable, single-file relational storage of runs, phase
//! executions, gate results, completion signals, progress events, and
//! completed features. One SQLite file, one migration script, CRUD methods
//! that return `Result<T>` — the same shape as the Kanban-board store this
//! crate's rusqlite idiom is drawn from, minus that store's own schema.

use crate::errors::StateStoreError;
use crate::gates::GateResult as RunGateResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::Path;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StateStoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id              TEXT PRIMARY KEY,
    plan_path       TEXT NOT NULL,
    status          TEXT NOT NULL,
    current_phase   TEXT,
    started_at      TEXT NOT NULL,
    completed_at    TEXT
);

CREATE TABLE IF NOT EXISTS phase_executions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    phase_id        TEXT NOT NULL,
    attempt         INTEGER NOT NULL,
    status          TEXT NOT NULL,
    pid             INTEGER,
    log_path        TEXT,
    error_message   TEXT,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    UNIQUE(run_id, phase_id, attempt)
);
CREATE INDEX IF NOT EXISTS idx_phase_executions_run ON phase_executions(run_id);

CREATE TABLE IF NOT EXISTS gate_results (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    phase_execution_id  INTEGER NOT NULL REFERENCES phase_executions(id) ON DELETE CASCADE,
    name                TEXT NOT NULL,
    command             TEXT NOT NULL,
    passed              INTEGER NOT NULL,
    output               TEXT NOT NULL,
    recorded_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gate_results_execution ON gate_results(phase_execution_id);

CREATE TABLE IF NOT EXISTS completion_signals (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    phase_id        TEXT NOT NULL,
    status          TEXT NOT NULL,
    reason          TEXT,
    report          TEXT,
    recorded_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_completion_signals_run_phase ON completion_signals(run_id, phase_id);

CREATE TABLE IF NOT EXISTS progress_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    phase_id    TEXT NOT NULL,
    step        TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_progress_log_run_phase ON progress_log(run_id, phase_id);

CREATE TABLE IF NOT EXISTS completed_features (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    issue_refs  TEXT,
    plan_path   TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
        }
    }

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            other => Err(format!("unknown run status: {other}")),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseExecutionStatus {
    Pending,
    Running,
    Validating,
    Completed,
    Failed,
    Blocked,
    AwaitingHuman,
}

impl PhaseExecutionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PhaseExecutionStatus::Pending => "pending",
            PhaseExecutionStatus::Running => "running",
            PhaseExecutionStatus::Validating => "validating",
            PhaseExecutionStatus::Completed => "completed",
            PhaseExecutionStatus::Failed => "failed",
            PhaseExecutionStatus::Blocked => "blocked",
            PhaseExecutionStatus::AwaitingHuman => "awaiting_human",
        }
    }

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(PhaseExecutionStatus::Pending),
            "running" => Ok(PhaseExecutionStatus::Running),
            "validating" => Ok(PhaseExecutionStatus::Validating),
            "completed" => Ok(PhaseExecutionStatus::Completed),
            "failed" => Ok(PhaseExecutionStatus::Failed),
            "blocked" => Ok(PhaseExecutionStatus::Blocked),
            "awaiting_human" => Ok(PhaseExecutionStatus::AwaitingHuman),
            other => Err(format!("unknown phase execution status: {other}")),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseExecutionStatus::Completed
                | PhaseExecutionStatus::Failed
                | PhaseExecutionStatus::Blocked
                | PhaseExecutionStatus::AwaitingHuman
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub plan_path: String,
    pub status: RunStatus,
    pub current_phase: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub phase_id: String,
    pub status: String,
    pub reason: Option<String>,
    pub report: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

struct RunRow {
    id: String,
    plan_path: String,
    status: String,
    current_phase: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        Ok(RunRecord {
            id: self.id,
            plan_path: self.plan_path,
            status: RunStatus::from_str(&self.status).map_err(|msg| {
                StateStoreError::Database(rusqlite::Error::InvalidColumnType(
                    2,
                    msg,
                    rusqlite::types::Type::Text,
                ))
            })?,
            current_phase: self.current_phase,
            started_at: parse_dt(&self.started_at),
            completed_at: self.completed_at.as_deref().map(parse_dt),
        })
    }
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub struct StateStore {
    conn: RefCell<Connection>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn: RefCell::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn: RefCell::new(conn) };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow().execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn create_run(&self, plan_path: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.borrow().execute(
            "INSERT INTO runs (id, plan_path, status, current_phase, started_at, completed_at)
             VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
            params![id, plan_path, RunStatus::Running.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.conn
            .borrow()
            .query_row(
                "SELECT id, plan_path, status, current_phase, started_at, completed_at
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        plan_path: row.get(1)?,
                        status: row.get(2)?,
                        current_phase: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                    })
                },
            )
            .optional()?
            .map(RunRow::into_record)
            .transpose()
    }

    pub fn get_current_run(&self) -> Result<Option<RunRecord>> {
        self.conn
            .borrow()
            .query_row(
                "SELECT id, plan_path, status, current_phase, started_at, completed_at
                 FROM runs WHERE status IN ('running', 'paused')
                 ORDER BY started_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        plan_path: row.get(1)?,
                        status: row.get(2)?,
                        current_phase: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                    })
                },
            )
            .optional()?
            .map(RunRow::into_record)
            .transpose()
    }

    pub fn find_resumable_run(&self, plan_path: &str) -> Result<Option<RunRecord>> {
        self.conn
            .borrow()
            .query_row(
                "SELECT id, plan_path, status, current_phase, started_at, completed_at
                 FROM runs WHERE plan_path = ?1 AND status IN ('running', 'paused', 'failed')
                 ORDER BY started_at DESC LIMIT 1",
                params![plan_path],
                |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        plan_path: row.get(1)?,
                        status: row.get(2)?,
                        current_phase: row.get(3)?,
                        started_at: row.get(4)?,
                        completed_at: row.get(5)?,
                    })
                },
            )
            .optional()?
            .map(RunRow::into_record)
            .transpose()
    }

    pub fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        if status.is_terminal() {
            self.conn.borrow().execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), run_id],
            )?;
        } else {
            self.conn.borrow().execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), run_id],
            )?;
        }
        Ok(())
    }

    pub fn set_current_phase(&self, run_id: &str, phase_id: Option<&str>) -> Result<()> {
        self.conn.borrow().execute(
            "UPDATE runs SET current_phase = ?1 WHERE id = ?2",
            params![phase_id, run_id],
        )?;
        Ok(())
    }

    /// Wrapped in a transaction: the duplicate-attempt check and the insert
    /// must observe a single consistent snapshot, or two concurrent callers
    /// could both pass the check and then both insert.
    pub fn create_phase_execution(&self, run_id: &str, phase_id: &str, attempt: u32) -> Result<i64> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM phase_executions WHERE run_id = ?1 AND phase_id = ?2 AND attempt = ?3",
                params![run_id, phase_id, attempt],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StateStoreError::DuplicateExecution {
                run_id: run_id.to_string(),
                phase_id: phase_id.to_string(),
                attempt,
            });
        }

        tx.execute(
            "INSERT INTO phase_executions (run_id, phase_id, attempt, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                phase_id,
                attempt,
                PhaseExecutionStatus::Pending.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn latest_execution_id(&self, run_id: &str, phase_id: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .borrow()
            .query_row(
                "SELECT id FROM phase_executions WHERE run_id = ?1 AND phase_id = ?2
                 ORDER BY attempt DESC LIMIT 1",
                params![run_id, phase_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn update_phase_status(
        &self,
        run_id: &str,
        phase_id: &str,
        status: PhaseExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let Some(exec_id) = self.latest_execution_id(run_id, phase_id)? else {
            return Ok(());
        };
        if status.is_terminal() {
            self.conn.borrow().execute(
                "UPDATE phase_executions SET status = ?1, error_message = ?2, ended_at = ?3 WHERE id = ?4",
                params![status.as_str(), error_message, Utc::now().to_rfc3339(), exec_id],
            )?;
        } else {
            self.conn.borrow().execute(
                "UPDATE phase_executions SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![status.as_str(), error_message, exec_id],
            )?;
        }
        Ok(())
    }

    pub fn set_phase_pid(&self, run_id: &str, phase_id: &str, pid: u32) -> Result<()> {
        if let Some(exec_id) = self.latest_execution_id(run_id, phase_id)? {
            self.conn.borrow().execute(
                "UPDATE phase_executions SET pid = ?1 WHERE id = ?2",
                params![pid, exec_id],
            )?;
        }
        Ok(())
    }

    pub fn set_phase_log_path(&self, run_id: &str, phase_id: &str, path: &str) -> Result<()> {
        if let Some(exec_id) = self.latest_execution_id(run_id, phase_id)? {
            self.conn.borrow().execute(
                "UPDATE phase_executions SET log_path = ?1 WHERE id = ?2",
                params![path, exec_id],
            )?;
        }
        Ok(())
    }

    pub fn get_attempt_count(&self, run_id: &str, phase_id: &str) -> Result<u32> {
        let count: u32 = self.conn.borrow().query_row(
            "SELECT COUNT(*) FROM phase_executions WHERE run_id = ?1 AND phase_id = ?2",
            params![run_id, phase_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_completed_phases(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT phase_id, status FROM phase_executions pe
             WHERE run_id = ?1 AND attempt = (
                 SELECT MAX(attempt) FROM phase_executions WHERE run_id = pe.run_id AND phase_id = pe.phase_id
             )",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let phase_id: String = row.get(0)?;
            let status: String = row.get(1)?;
            Ok((phase_id, status))
        })?;
        let mut completed = Vec::new();
        for row in rows {
            let (phase_id, status) = row?;
            if status == PhaseExecutionStatus::Completed.as_str() {
                completed.push(phase_id);
            }
        }
        Ok(completed)
    }

    pub fn record_gate_result(&self, phase_execution_id: i64, result: &RunGateResult) -> Result<()> {
        self.conn.borrow().execute(
            "INSERT INTO gate_results (phase_execution_id, name, command, passed, output, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                phase_execution_id,
                result.name,
                result.command,
                result.passed as i64,
                result.output,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_gate_results(&self, phase_execution_id: i64) -> Result<Vec<RunGateResult>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT name, command, passed, output FROM gate_results WHERE phase_execution_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![phase_execution_id], |row| {
            Ok(RunGateResult {
                name: row.get(0)?,
                command: row.get(1)?,
                passed: row.get::<_, i64>(2)? != 0,
                output: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StateStoreError::from)
    }

    pub fn record_completion_signal(
        &self,
        run_id: &str,
        phase_id: &str,
        status: &str,
        reason: Option<&str>,
        report: Option<&str>,
    ) -> Result<()> {
        self.conn.borrow().execute(
            "INSERT INTO completion_signals (run_id, phase_id, status, reason, report, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![run_id, phase_id, status, reason, report, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_completion_signal(&self, run_id: &str, phase_id: &str) -> Result<Option<CompletionSignal>> {
        self.conn
            .borrow()
            .query_row(
                "SELECT phase_id, status, reason, report, recorded_at FROM completion_signals
                 WHERE run_id = ?1 AND phase_id = ?2 ORDER BY recorded_at DESC LIMIT 1",
                params![run_id, phase_id],
                |row| {
                    Ok(CompletionSignal {
                        phase_id: row.get(0)?,
                        status: row.get(1)?,
                        reason: row.get(2)?,
                        report: row.get(3)?,
                        recorded_at: parse_dt(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()
            .map_err(StateStoreError::from)
    }

    pub fn log_progress(&self, run_id: &str, phase_id: &str, step: &str) -> Result<()> {
        self.conn.borrow().execute(
            "INSERT INTO progress_log (run_id, phase_id, step, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, phase_id, step, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_progress(&self, run_id: &str, phase_id: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT step, recorded_at FROM progress_log WHERE run_id = ?1 AND phase_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id, phase_id], |row| {
            let step: String = row.get(0)?;
            let recorded_at: String = row.get(1)?;
            Ok((step, recorded_at))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (step, recorded_at) = row?;
            out.push((step, parse_dt(&recorded_at)));
        }
        Ok(out)
    }

    pub fn record_completion(&self, name: &str, issue_refs: Option<&str>, plan_path: &str) -> Result<i64> {
        self.conn.borrow().execute(
            "INSERT INTO completed_features (name, issue_refs, plan_path, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, issue_refs, plan_path, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.borrow().last_insert_rowid())
    }

    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT id, plan_path, status, current_phase, started_at, completed_at
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                plan_path: row.get(1)?,
                status: row.get(2)?,
                current_phase: row.get(3)?,
                started_at: row.get(4)?,
                completed_at: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_result(name: &str, passed: bool) -> RunGateResult {
        RunGateResult {
            name: name.to_string(),
            command: "echo".to_string(),
            passed,
            output: "ok".to_string(),
        }
    }

    #[test]
    fn create_and_get_run() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        let run = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.plan_path, "PLAN.md");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn update_run_status_stamps_completion() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.update_run_status(&run_id, RunStatus::Completed).unwrap();
        let run = store.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn get_current_run_prefers_non_terminal() {
        let store = StateStore::open_in_memory().unwrap();
        let r1 = store.create_run("PLAN.md").unwrap();
        store.update_run_status(&r1, RunStatus::Completed).unwrap();
        let r2 = store.create_run("PLAN.md").unwrap();
        let current = store.get_current_run().unwrap().unwrap();
        assert_eq!(current.id, r2);
    }

    #[test]
    fn create_phase_execution_rejects_duplicate() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.create_phase_execution(&run_id, "1", 1).unwrap();
        let err = store.create_phase_execution(&run_id, "1", 1).unwrap_err();
        assert!(matches!(err, StateStoreError::DuplicateExecution { .. }));
    }

    #[test]
    fn update_phase_status_targets_latest_attempt() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.create_phase_execution(&run_id, "1", 1).unwrap();
        store.create_phase_execution(&run_id, "1", 2).unwrap();
        store
            .update_phase_status(&run_id, "1", PhaseExecutionStatus::Completed, None)
            .unwrap();
        assert_eq!(store.get_attempt_count(&run_id, "1").unwrap(), 2);
        assert_eq!(store.get_completed_phases(&run_id).unwrap(), vec!["1".to_string()]);
    }

    #[test]
    fn get_completed_phases_only_highest_attempt() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.create_phase_execution(&run_id, "1", 1).unwrap();
        store
            .update_phase_status(&run_id, "1", PhaseExecutionStatus::Failed, Some("bad"))
            .unwrap();
        store.create_phase_execution(&run_id, "1", 2).unwrap();
        assert!(store.get_completed_phases(&run_id).unwrap().is_empty());
        store
            .update_phase_status(&run_id, "1", PhaseExecutionStatus::Completed, None)
            .unwrap();
        assert_eq!(store.get_completed_phases(&run_id).unwrap(), vec!["1".to_string()]);
    }

    #[test]
    fn gate_results_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        let exec_id = store.create_phase_execution(&run_id, "1", 1).unwrap();
        store.record_gate_result(exec_id, &gate_result("lint", true)).unwrap();
        store.record_gate_result(exec_id, &gate_result("test", false)).unwrap();
        let results = store.get_gate_results(exec_id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "lint");
        assert!(!results[1].passed);
    }

    #[test]
    fn completion_signal_latest_by_timestamp() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store
            .record_completion_signal(&run_id, "1", "blocked", Some("waiting"), None)
            .unwrap();
        store
            .record_completion_signal(&run_id, "1", "completed", None, Some("{}"))
            .unwrap();
        let sig = store.get_completion_signal(&run_id, "1").unwrap().unwrap();
        assert_eq!(sig.status, "completed");
    }

    #[test]
    fn progress_log_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.log_progress(&run_id, "1", "scaffolding done").unwrap();
        store.log_progress(&run_id, "1", "tests written").unwrap();
        let progress = store.get_progress(&run_id, "1").unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].0, "scaffolding done");
    }

    #[test]
    fn list_runs_orders_most_recent_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_run("A.md").unwrap();
        let second = store.create_run("B.md").unwrap();
        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs[0].id, second);
    }

    #[test]
    fn find_resumable_run_matches_plan_path() {
        let store = StateStore::open_in_memory().unwrap();
        let run_id = store.create_run("PLAN.md").unwrap();
        store.update_run_status(&run_id, RunStatus::Paused).unwrap();
        let found = store.find_resumable_run("PLAN.md").unwrap().unwrap();
        assert_eq!(found.id, run_id);
        assert!(store.find_resumable_run("OTHER.md").unwrap().is_none());
    }
}
