//! Layered runtime configuration: CLI flags override `.debussy/config.yaml`,
//! which overrides environment variables, which override built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_true() -> bool {
    true
}

fn default_gate_timeout_secs() -> u64 {
    300
}

fn default_phase_timeout_secs() -> u64 {
    1800
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_restarts() -> u32 {
    3
}

fn default_context_threshold_pct() -> f64 {
    0.85
}

fn default_tool_call_threshold() -> u64 {
    200
}

/// Values read from `.debussy/config.yaml`. Every field is optional so a
/// partial file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub claude_cmd: Option<String>,
    pub model: Option<String>,
    pub skip_permissions: Option<bool>,
    pub gate_timeout_secs: Option<u64>,
    pub phase_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_restarts: Option<u32>,
    pub context_threshold_pct: Option<f64>,
    pub tool_call_threshold: Option<u64>,
    pub auto_commit: Option<bool>,
}

/// Resolved configuration for a single invocation, after layering CLI flags
/// over the config file, environment variables, and defaults in that order.
#[derive(Debug, Clone)]
pub struct DebussyConfig {
    pub project_dir: PathBuf,
    pub debussy_dir: PathBuf,
    pub state_file: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub claude_cmd: String,
    pub model: String,
    pub skip_permissions: bool,
    pub verbose: bool,
    pub gate_timeout_secs: u64,
    pub phase_timeout_secs: u64,
    pub max_retries: u32,
    pub max_restarts: u32,
    pub context_threshold_pct: f64,
    pub tool_call_threshold: u64,
    pub auto_commit: bool,
}

pub struct CliOverrides {
    pub model: Option<String>,
    pub no_interactive: bool,
    pub auto_commit: Option<bool>,
}

impl Default for CliOverrides {
    fn default() -> Self {
        Self {
            model: None,
            no_interactive: true,
            auto_commit: None,
        }
    }
}

impl DebussyConfig {
    pub fn load(project_dir: impl AsRef<Path>, verbose: bool, cli: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .as_ref()
            .canonicalize()
            .context("failed to resolve project directory")?;
        let debussy_dir = project_dir.join(".debussy");
        let config_file = debussy_dir.join("config.yaml");

        let file_config = Self::load_file_config(&config_file)?;

        let env_claude_cmd = std::env::var("DEBUSSY_CLAUDE_CMD").ok();
        let env_model = std::env::var("DEBUSSY_MODEL").ok();
        let env_skip_permissions = std::env::var("DEBUSSY_SKIP_PERMISSIONS").ok().map(|v| v != "false");

        let claude_cmd = file_config
            .claude_cmd
            .or(env_claude_cmd)
            .unwrap_or_else(default_claude_cmd);
        let model = cli
            .model
            .or(file_config.model)
            .or(env_model)
            .unwrap_or_else(default_model);
        let skip_permissions = file_config
            .skip_permissions
            .or(env_skip_permissions)
            .unwrap_or_else(default_true);
        let auto_commit = cli.auto_commit.or(file_config.auto_commit).unwrap_or_else(default_true);

        Ok(Self {
            debussy_dir: debussy_dir.clone(),
            state_file: debussy_dir.join("state.db"),
            log_dir: debussy_dir.join("logs"),
            config_file,
            claude_cmd,
            model,
            skip_permissions,
            verbose,
            gate_timeout_secs: file_config.gate_timeout_secs.unwrap_or_else(default_gate_timeout_secs),
            phase_timeout_secs: file_config
                .phase_timeout_secs
                .unwrap_or_else(default_phase_timeout_secs),
            max_retries: file_config.max_retries.unwrap_or_else(default_max_retries),
            max_restarts: file_config.max_restarts.unwrap_or_else(default_max_restarts),
            context_threshold_pct: file_config
                .context_threshold_pct
                .unwrap_or_else(default_context_threshold_pct),
            tool_call_threshold: file_config
                .tool_call_threshold
                .unwrap_or_else(default_tool_call_threshold),
            auto_commit,
            project_dir,
        })
    }

    fn load_file_config(config_file: &Path) -> Result<FileConfig> {
        if !config_file.exists() {
            return Ok(FileConfig::default());
        }
        let content = std::fs::read_to_string(config_file)
            .with_context(|| format!("failed to read {}", config_file.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", config_file.display()))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.debussy_dir).context("failed to create .debussy directory")?;
        std::fs::create_dir_all(&self.log_dir).context("failed to create logs directory")?;
        Ok(())
    }

    pub fn claude_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags.push("--model".to_string());
        flags.push(self.model.clone());
        flags
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_config_file() {
        let dir = tempdir().unwrap();
        let config = DebussyConfig::load(dir.path(), false, CliOverrides::default()).unwrap();
        assert_eq!(config.claude_cmd, "claude");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_attempts(), 3);
        assert!(config.skip_permissions);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".debussy")).unwrap();
        fs::write(
            dir.path().join(".debussy/config.yaml"),
            "max_retries: 5\nclaude_cmd: my-worker\n",
        )
        .unwrap();
        let config = DebussyConfig::load(dir.path(), false, CliOverrides::default()).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.claude_cmd, "my-worker");
    }

    #[test]
    fn cli_model_override_wins_over_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".debussy")).unwrap();
        fs::write(dir.path().join(".debussy/config.yaml"), "model: file-model\n").unwrap();
        let cli = CliOverrides {
            model: Some("cli-model".to_string()),
            ..Default::default()
        };
        let config = DebussyConfig::load(dir.path(), false, cli).unwrap();
        assert_eq!(config.model, "cli-model");
    }

    #[test]
    fn ensure_directories_creates_debussy_tree() {
        let dir = tempdir().unwrap();
        let config = DebussyConfig::load(dir.path(), false, CliOverrides::default()).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.debussy_dir.exists());
        assert!(config.log_dir.exists());
    }

    #[test]
    fn claude_flags_include_model_and_permissions() {
        let dir = tempdir().unwrap();
        let config = DebussyConfig::load(dir.path(), false, CliOverrides::default()).unwrap();
        let flags = config.claude_flags();
        assert!(flags.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(flags.contains(&config.model));
    }
}
