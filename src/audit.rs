//! Plan Auditor: validates a loaded plan's structural integrity before any
//! run is allowed to start — missing phase documents, undeclared gates,
//! dangling dependencies, and dependency cycles.

use crate::plan::Plan;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditIssue {
    pub severity: IssueSeverity,
    pub code: &'static str,
    pub message: String,
}

impl AuditIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub master_plan: String,
    pub phases_found: usize,
    pub phases_valid: usize,
    pub gates_total: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub passed: bool,
    pub issues: Vec<AuditIssue>,
    pub summary: AuditSummary,
}

/// Audit an already-loaded plan. Missing-master and parse-error cases are
/// raised by the caller from the load error before a `Plan` even exists;
/// this function covers every check that needs the parsed structure.
pub fn audit_plan(plan: &Plan) -> AuditReport {
    let mut issues = Vec::new();
    let mut invalid_phase_ids: HashSet<&str> = HashSet::new();

    if plan.phases.is_empty() {
        issues.push(AuditIssue::error("NO_PHASES", "master plan declares no phases"));
    }

    for phase in &plan.phases {
        if !phase.document_path.exists() {
            issues.push(AuditIssue::error(
                "PHASE_NOT_FOUND",
                format!("phase {} document not found: {}", phase.id, phase.document_path.display()),
            ));
            invalid_phase_ids.insert(phase.id.as_str());
        }
        if phase.gates.is_empty() {
            issues.push(AuditIssue::error(
                "MISSING_GATES",
                format!("phase {} declares no gates", phase.id),
            ));
            invalid_phase_ids.insert(phase.id.as_str());
        }
        if phase.notes_output.is_none() {
            issues.push(AuditIssue::warning(
                "NO_NOTES_OUTPUT",
                format!("phase {} has no notes output path", phase.id),
            ));
        }
        for dep in &phase.depends_on {
            if plan.phase(dep).is_none() {
                issues.push(AuditIssue::warning(
                    "MISSING_DEPENDENCY",
                    format!("phase {} depends on nonexistent phase {}", phase.id, dep),
                ));
            }
        }
    }

    if let Some(cycle) = find_cycle(plan) {
        for id in &cycle {
            invalid_phase_ids.insert(plan.phase(id).map(|p| p.id.as_str()).unwrap_or(id.as_str()));
        }
        issues.push(AuditIssue::error(
            "CIRCULAR_DEPENDENCY",
            format!("CIRCULAR_DEPENDENCY: {}", cycle.join(" -> ")),
        ));
    }

    let errors = issues.iter().filter(|i| i.severity == IssueSeverity::Error).count();
    let warnings = issues.iter().filter(|i| i.severity == IssueSeverity::Warning).count();
    let phases_valid = plan.phases.iter().filter(|p| !invalid_phase_ids.contains(p.id.as_str())).count();

    let summary = AuditSummary {
        master_plan: plan.name.clone(),
        phases_found: plan.phases.len(),
        phases_valid,
        gates_total: plan.phases.iter().map(|p| p.gates.len()).sum(),
        errors,
        warnings,
    };

    AuditReport {
        passed: errors == 0,
        issues,
        summary,
    }
}

/// DFS over the dependency graph, looking for the first cycle. Returns the
/// cycle as an ordered path `A -> B -> ... -> A`.
fn find_cycle(plan: &Plan) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    for phase in &plan.phases {
        if !visited.contains(phase.id.as_str()) {
            if let Some(cycle) = visit(plan, &phase.id, &mut visited, &mut stack, &mut on_stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    plan: &'a Plan,
    id: &'a str,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(id);
    stack.push(id);
    on_stack.insert(id);

    if let Some(phase) = plan.phase(id) {
        for dep in &phase.depends_on {
            let dep_id = plan.phases.iter().find(|p| &p.id == dep).map(|p| p.id.as_str());
            let Some(dep_id) = dep_id else { continue };
            if on_stack.contains(dep_id) {
                let start = stack.iter().position(|s| *s == dep_id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep_id.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep_id) {
                if let Some(cycle) = visit(plan, dep_id, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(id);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Gate, Phase, PhaseStatus};
    use std::path::PathBuf;

    fn phase(id: &str, deps: &[&str], existing_doc: bool) -> Phase {
        Phase {
            id: id.to_string(),
            title: format!("Phase {id}"),
            document_path: if existing_doc {
                PathBuf::from(file!())
            } else {
                PathBuf::from("/nonexistent/path/for/audit/test.md")
            },
            status: PhaseStatus::Pending,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            gates: vec![Gate {
                name: "lint".into(),
                command: "cargo clippy".into(),
                blocking: true,
            }],
            required_agents: vec![],
            required_steps: vec![],
            notes_input: None,
            notes_output: Some(PathBuf::from("notes.md")),
        }
    }

    fn plan(phases: Vec<Phase>) -> Plan {
        Plan {
            name: "Test Plan".to_string(),
            master_path: PathBuf::from("MASTER.md"),
            phases,
            github_issues: None,
            github_repo: None,
            jira_issues: None,
        }
    }

    #[test]
    fn empty_plan_raises_no_phases() {
        let report = audit_plan(&plan(vec![]));
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.code == "NO_PHASES"));
    }

    #[test]
    fn missing_phase_document_is_error() {
        let report = audit_plan(&plan(vec![phase("1", &[], false)]));
        assert!(!report.passed);
        assert!(report.issues.iter().any(|i| i.code == "PHASE_NOT_FOUND"));
    }

    #[test]
    fn missing_gates_is_error() {
        let mut p = phase("1", &[], true);
        p.gates.clear();
        let report = audit_plan(&plan(vec![p]));
        assert!(report.issues.iter().any(|i| i.code == "MISSING_GATES"));
    }

    #[test]
    fn no_notes_output_is_warning_not_error() {
        let mut p = phase("1", &[], true);
        p.notes_output = None;
        let report = audit_plan(&plan(vec![p]));
        assert!(report.passed);
        assert!(report.issues.iter().any(|i| i.code == "NO_NOTES_OUTPUT"));
        assert_eq!(report.summary.warnings, 1);
    }

    #[test]
    fn dangling_dependency_is_warning() {
        let report = audit_plan(&plan(vec![phase("1", &["99"], true)]));
        assert!(report.passed);
        assert!(report.issues.iter().any(|i| i.code == "MISSING_DEPENDENCY"));
    }

    #[test]
    fn self_dependency_forms_cycle() {
        let report = audit_plan(&plan(vec![phase("1", &["1"], true)]));
        assert!(!report.passed);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == "CIRCULAR_DEPENDENCY" && i.message.contains("1 -> 1")));
    }

    #[test]
    fn three_node_cycle_reports_full_path() {
        let phases = vec![
            phase("1", &["3"], true),
            phase("2", &["1"], true),
            phase("3", &["2"], true),
        ];
        let report = audit_plan(&plan(phases));
        assert!(!report.passed);
        let cycle_issue = report.issues.iter().find(|i| i.code == "CIRCULAR_DEPENDENCY").unwrap();
        assert!(cycle_issue.message.contains("->"));
    }

    #[test]
    fn clean_plan_passes() {
        let phases = vec![phase("1", &[], true), phase("2", &["1"], true)];
        let report = audit_plan(&plan(phases));
        assert!(report.passed);
        assert_eq!(report.summary.phases_found, 2);
        assert_eq!(report.summary.phases_valid, 2);
        assert_eq!(report.summary.errors, 0);
    }
}
