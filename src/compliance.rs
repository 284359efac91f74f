//! Compliance Checker: re-verifies a worker's claimed completion of a phase
//! against gates, the notes file, and session-transcript evidence of
//! required agents and process steps, then picks a remediation strategy.

use crate::gates::GateRunner;
use crate::plan::{Phase, RequiredStep};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    NotesMissing,
    NotesIncomplete,
    GatesFailed,
    AgentSkipped,
    StepSkipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub details: String,
    pub evidence: Option<String>,
}

impl ComplianceIssue {
    fn new(kind: IssueKind, severity: Severity, details: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            details: details.into(),
            evidence: None,
        }
    }

    fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationStrategy {
    WarnAndAccept,
    TargetedFix,
    FullRetry,
    HumanRequired,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CompletionReport {
    #[serde(default)]
    pub agents_used: Vec<String>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ComplianceResult {
    pub passed: bool,
    pub issues: Vec<ComplianceIssue>,
    pub strategy: RemediationStrategy,
    pub gate_results: Vec<crate::gates::GateResult>,
}

struct StepPattern {
    step: RequiredStep,
    patterns: &'static [&'static str],
}

static STEP_PATTERNS: &[StepPattern] = &[
    StepPattern {
        step: RequiredStep::ReadPreviousNotes,
        patterns: &["(?i)read.*notes", "(?i)previous.*notes"],
    },
    StepPattern {
        step: RequiredStep::DocSyncManager,
        patterns: &["(?i)doc-sync-manager", "(?i)sync.*ACTIVE"],
    },
    StepPattern {
        step: RequiredStep::Implementation,
        patterns: &["(?i)implement", r"(?i)task.*\d+\.\d+"],
    },
    StepPattern {
        step: RequiredStep::PreValidation,
        patterns: &["(?i)clippy|cargo check|cargo test", "(?i)validation"],
    },
    StepPattern {
        step: RequiredStep::TaskValidator,
        patterns: &["(?i)task-validator", "(?i)validator"],
    },
    StepPattern {
        step: RequiredStep::WriteNotes,
        patterns: &["(?i)write.*notes", "NOTES_"],
    },
];

static AGENT_EVIDENCE_TEMPLATES: &[&str] = &[
    r#"(?i)subagent_type["\s:=]+{agent}"#,
    r"(?i)Task.*{agent}",
    r"(?i)launching.*{agent}",
];

fn agent_evidence_regexes(agent: &str) -> Vec<Regex> {
    AGENT_EVIDENCE_TEMPLATES
        .iter()
        .filter_map(|tpl| Regex::new(&tpl.replace("{agent}", &regex::escape(agent))).ok())
        .collect()
}

static NOTES_SECTIONS: &[&str] = &["## Summary", "## Key Decisions", "## Files Modified"];

static STEP_PATTERN_REGEXES: LazyLock<Vec<(RequiredStep, Vec<Regex>)>> = LazyLock::new(|| {
    STEP_PATTERNS
        .iter()
        .map(|sp| {
            let regexes = sp.patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
            (sp.step, regexes)
        })
        .collect()
});

pub struct ComplianceChecker<'a> {
    gate_runner: &'a GateRunner,
}

impl<'a> ComplianceChecker<'a> {
    pub fn new(gate_runner: &'a GateRunner) -> Self {
        Self { gate_runner }
    }

    pub async fn check(
        &self,
        phase: &Phase,
        session_text: &str,
        report: Option<&CompletionReport>,
    ) -> ComplianceResult {
        let mut issues = Vec::new();

        let (gates_passed, gate_results) = self.gate_runner.verify_all_gates_pass(&phase.gates).await;
        if !gates_passed {
            for result in gate_results.iter().filter(|r| !r.passed) {
                issues.push(
                    ComplianceIssue::new(
                        IssueKind::GatesFailed,
                        Severity::Critical,
                        format!("gate '{}' failed: {}", result.name, result.command),
                    )
                    .with_evidence(result.output.clone()),
                );
            }
        }

        if let Some(notes_path) = &phase.notes_output {
            self.check_notes(notes_path, &mut issues);
        }

        for agent in &phase.required_agents {
            self.check_agent(agent, session_text, report, &mut issues);
        }

        for step in &phase.required_steps {
            self.check_step(*step, session_text, report, &mut issues);
        }

        let strategy = select_strategy(&issues);
        ComplianceResult {
            passed: issues.is_empty(),
            issues,
            strategy,
            gate_results,
        }
    }

    fn check_notes(&self, notes_path: &Path, issues: &mut Vec<ComplianceIssue>) {
        let content = match std::fs::read_to_string(notes_path) {
            Ok(c) => c,
            Err(_) => {
                issues.push(ComplianceIssue::new(
                    IssueKind::NotesMissing,
                    Severity::High,
                    format!("notes file not found at {}", notes_path.display()),
                ));
                return;
            }
        };

        let missing: Vec<&str> = NOTES_SECTIONS
            .iter()
            .filter(|section| !content.contains(*section))
            .copied()
            .collect();
        if !missing.is_empty() {
            issues.push(ComplianceIssue::new(
                IssueKind::NotesIncomplete,
                Severity::Low,
                format!("notes file missing sections: {}", missing.join(", ")),
            ));
        }
    }

    fn check_agent(
        &self,
        agent: &str,
        session_text: &str,
        report: Option<&CompletionReport>,
        issues: &mut Vec<ComplianceIssue>,
    ) {
        let log_evidence = agent_evidence_regexes(agent).iter().any(|re| re.is_match(session_text));
        let report_claims = report.is_some_and(|r| r.agents_used.iter().any(|a| a == agent));

        if !log_evidence && !report_claims {
            issues.push(ComplianceIssue::new(
                IssueKind::AgentSkipped,
                Severity::Critical,
                format!("required agent '{agent}' was never invoked"),
            ));
        } else if report_claims && !log_evidence {
            issues.push(ComplianceIssue::new(
                IssueKind::AgentSkipped,
                Severity::High,
                format!("report claims agent '{agent}' ran but no session evidence found"),
            ));
        }
    }

    fn check_step(
        &self,
        step: RequiredStep,
        session_text: &str,
        report: Option<&CompletionReport>,
        issues: &mut Vec<ComplianceIssue>,
    ) {
        let log_evidence = STEP_PATTERN_REGEXES
            .iter()
            .find(|(s, _)| *s == step)
            .is_some_and(|(_, regexes)| regexes.iter().any(|re| re.is_match(session_text)));
        let report_claims = report.is_some_and(|r| r.steps_completed.iter().any(|s| s == step.as_str()));

        if !log_evidence && !report_claims {
            issues.push(ComplianceIssue::new(
                IssueKind::StepSkipped,
                Severity::High,
                format!("required step '{}' has no evidence of completion", step.as_str()),
            ));
        }
    }
}

fn select_strategy(issues: &[ComplianceIssue]) -> RemediationStrategy {
    if issues.is_empty() {
        return RemediationStrategy::WarnAndAccept;
    }
    let critical = issues.iter().filter(|i| i.severity == Severity::Critical).count();
    let high = issues.iter().filter(|i| i.severity == Severity::High).count();

    if critical >= 2 {
        RemediationStrategy::FullRetry
    } else if critical == 1 || high >= 2 {
        RemediationStrategy::TargetedFix
    } else {
        RemediationStrategy::WarnAndAccept
    }
}
