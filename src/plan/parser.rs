//! Markdown parsing for the master plan and its phase documents.
//!
//! Grounded in the dedicated master/phase parsers of the system this crate
//! reimplements: a master-plan phases table of `| id | [title](path) | ... | status |`
//! rows, and per-phase documents with a `## Gates` section, a dependencies
//! section, and a `## Process Wrapper` listing the six required steps.

use super::{Gate, Phase, PhaseStatus, Plan, RequiredStep};
use crate::errors::PlanError;
use anyhow::Context as _;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Canonical gate name -> shell command, re-grounded to the Rust toolchain
/// a worker CLI actually drives (the original table targeted Python tools).
/// Unknown gate names fall back to an inert placeholder that is structurally
/// valid but will fail at runtime if actually invoked.
pub static GATE_COMMANDS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("lint", "cargo clippy --all-targets -- -D warnings");
    m.insert("typecheck", "cargo check --all-targets");
    m.insert("test", "cargo test");
    m.insert("tests", "cargo test");
    m.insert("fmt", "cargo fmt -- --check");
    m.insert("build", "cargo build --all-targets");
    m
});

fn gate_command_for(name: &str) -> String {
    GATE_COMMANDS
        .get(name.to_lowercase().as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("echo 'Unknown gate: {name}'"))
}

static PHASE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\|\s*(\d+(?:\.\d+)?)\s*\|\s*\[([^\]]+)\]\(([^)]+)\)\s*\|(.*)\|\s*([^|]+?)\s*\|\s*$")
        .unwrap()
});

static TOP_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

static GITHUB_ISSUES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\*\*GitHub Issues:\*\*\s*(.+)").unwrap());
static GITHUB_REPO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\*\*GitHub Repo:\*\*\s*(.+)").unwrap());
static JIRA_ISSUES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\*\*Jira Issues:\*\*\s*(.+)").unwrap());

static GATE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*-\s*([A-Za-z0-9_]+)\s*:\s*(.+)$").unwrap());

static AGENT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)AGENT:\s*([A-Za-z0-9_\-]+)").unwrap());
static AGENT_REQUIRED_ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\|\s*([A-Za-z0-9_\-]+)\s*\|.*REQUIRED.*\|\s*$").unwrap());

static DEPENDS_ON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:Depends On|Previous phase|Requires):\s*(.+)").unwrap());
static DEP_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static DEP_BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*-\s*Phase\s+(\d+(?:\.\d+)?)").unwrap());

static NOTES_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+\.md)`").unwrap());

/// Load a master plan and every phase document it references.
pub fn load_plan(master_path: &Path) -> Result<Plan, PlanError> {
    let master_path = master_path.to_path_buf();
    let content = std::fs::read_to_string(&master_path).map_err(|_| PlanError::MasterNotFound {
        path: master_path.clone(),
    })?;

    let name = parse_master_name(&content);
    let github_issues = GITHUB_ISSUES_RE
        .captures(&content)
        .map(|c| c[1].trim().to_string());
    let github_repo = GITHUB_REPO_RE
        .captures(&content)
        .map(|c| c[1].trim().to_string());
    let jira_issues = JIRA_ISSUES_RE
        .captures(&content)
        .map(|c| c[1].trim().to_string());

    let rows = parse_phase_rows(&content);
    if rows.is_empty() {
        return Err(PlanError::NoPhases);
    }

    let base_dir = master_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut phases = Vec::with_capacity(rows.len());
    for row in rows {
        let doc_path = base_dir.join(&row.relative_path);
        let doc_content = std::fs::read_to_string(&doc_path).map_err(|_| PlanError::PhaseNotFound {
            id: row.id.clone(),
            path: doc_path.clone(),
        })?;

        let phase = parse_phase_document(&row, doc_path.clone(), &doc_content).map_err(|e| {
            PlanError::PhaseParseFailed {
                id: row.id.clone(),
                path: doc_path.clone(),
                reason: e,
            }
        })?;
        phases.push(phase);
    }

    Ok(Plan {
        name,
        master_path,
        phases,
        github_issues,
        github_repo,
        jira_issues,
    })
}

fn parse_master_name(content: &str) -> String {
    TOP_HEADING_RE
        .captures(content)
        .map(|c| {
            c[1].trim()
                .trim_end_matches("Master Plan")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "Untitled Plan".to_string())
}

struct PhaseRow {
    id: String,
    title: String,
    relative_path: String,
    status: PhaseStatus,
}

fn parse_phase_rows(content: &str) -> Vec<PhaseRow> {
    let mut rows = Vec::new();
    for line in content.lines() {
        if let Some(caps) = PHASE_ROW_RE.captures(line) {
            rows.push(PhaseRow {
                id: caps[1].to_string(),
                title: caps[2].trim().to_string(),
                relative_path: caps[3].trim().to_string(),
                status: PhaseStatus::from_str(&caps[5]),
            });
        }
    }
    rows
}

fn parse_phase_document(
    row: &PhaseRow,
    doc_path: PathBuf,
    content: &str,
) -> anyhow::Result<Phase> {
    let depends_on = parse_dependencies(content, &row.id);
    let gates = parse_gates(content);
    let required_agents = parse_required_agents(content);
    let required_steps = parse_required_steps(content);
    let (notes_input, notes_output) = parse_notes_paths(content);

    Ok(Phase {
        id: row.id.clone(),
        title: row.title.clone(),
        document_path: doc_path,
        status: row.status,
        depends_on,
        gates,
        required_agents,
        required_steps,
        notes_input,
        notes_output,
    })
}

/// Only explicit dependency forms count: "Depends On:"/"Previous phase:"/
/// "Requires:" lines, or bulleted "- Phase N" rows under a Dependencies
/// section. Casual prose like "used by Phase 3" is deliberately ignored.
fn parse_dependencies(content: &str, own_id: &str) -> Vec<String> {
    let mut deps = Vec::new();
    if let Some(caps) = DEPENDS_ON_RE.captures(content) {
        for m in DEP_ID_RE.find_iter(&caps[1]) {
            deps.push(m.as_str().to_string());
        }
    }
    for caps in DEP_BULLET_RE.captures_iter(content) {
        deps.push(caps[1].to_string());
    }
    deps.retain(|d| d != own_id);
    deps.sort();
    deps.dedup();
    deps
}

fn parse_gates(content: &str) -> Vec<Gate> {
    let Some(section) = extract_section(content, "Gates") else {
        return Vec::new();
    };
    GATE_LINE_RE
        .captures_iter(&section)
        .map(|caps| {
            let name = caps[1].trim().to_string();
            Gate {
                command: gate_command_for(&name),
                name,
                blocking: true,
            }
        })
        .collect()
}

fn parse_required_agents(content: &str) -> Vec<String> {
    let mut agents: Vec<String> = AGENT_MARKER_RE
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    agents.extend(
        AGENT_REQUIRED_ROW_RE
            .captures_iter(content)
            .map(|c| c[1].to_string()),
    );
    agents.sort();
    agents.dedup();
    agents
}

fn parse_required_steps(content: &str) -> Vec<RequiredStep> {
    let Some(section) = extract_section(content, "Process Wrapper") else {
        return Vec::new();
    };
    let lower = section.to_lowercase();
    [
        RequiredStep::ReadPreviousNotes,
        RequiredStep::DocSyncManager,
        RequiredStep::Implementation,
        RequiredStep::PreValidation,
        RequiredStep::TaskValidator,
        RequiredStep::WriteNotes,
    ]
    .into_iter()
    .filter(|step| lower.contains(&step.as_str().replace('_', "-")) || lower.contains(step.as_str()))
    .collect()
}

fn parse_notes_paths(content: &str) -> (Option<PathBuf>, Option<PathBuf>) {
    let mut input = None;
    let mut output = None;
    for m in NOTES_PATH_RE.find_iter(content) {
        let raw = m.as_str().trim_matches('`');
        let lower = raw.to_lowercase();
        if lower.contains("previous") || lower.contains("input") {
            input.get_or_insert_with(|| PathBuf::from(raw));
        } else if lower.contains("notes") {
            output.get_or_insert_with(|| PathBuf::from(raw));
        }
    }
    (input, output)
}

/// Extract the body of a `## <name>` markdown section up to the next `##`
/// heading (or end of document).
fn extract_section(content: &str, name: &str) -> Option<String> {
    let header = format!("## {name}");
    let start = content.find(&header)?;
    let after_header = &content[start + header.len()..];
    let end = after_header
        .find("\n## ")
        .unwrap_or(after_header.len());
    Some(after_header[..end].to_string())
}
