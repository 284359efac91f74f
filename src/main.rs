use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use debussy::collaborator::LoggingCollaborator;
use debussy::config::{CliOverrides, DebussyConfig};
use debussy::orchestrator::{Orchestrator, RunOptions};
use debussy::plan::load_plan;
use debussy::state::{RunStatus, StateStore};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "debussy")]
#[command(version, about = "Plan-driven orchestrator for an external code-generation worker")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start or resume a plan
    Run {
        plan_path: PathBuf,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        no_interactive: bool,
        #[arg(long)]
        allow_dirty: bool,
        #[arg(long)]
        no_auto_commit: bool,
    },
    /// Write a completion signal for the current run
    Done {
        #[arg(long)]
        phase: String,
        #[arg(long)]
        status: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        report: Option<String>,
    },
    /// Append a progress event for the current run
    Progress {
        #[arg(long)]
        phase: String,
        #[arg(long)]
        step: String,
    },
    /// Pretty-print a run and its phase executions
    Status {
        #[arg(long)]
        run: Option<String>,
    },
    /// Continue the most recent paused run
    Resume,
    /// List past runs
    History {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let result = match &cli.command {
        Commands::Run {
            plan_path,
            phase,
            dry_run,
            model,
            no_interactive,
            allow_dirty,
            no_auto_commit,
        } => {
            cmd_run(
                &project_dir,
                cli.verbose,
                plan_path,
                phase.as_deref(),
                *dry_run,
                model.clone(),
                *no_interactive,
                *allow_dirty,
                *no_auto_commit,
            )
            .await
        }
        Commands::Done {
            phase,
            status,
            reason,
            report,
        } => cmd_done(&project_dir, cli.verbose, phase, status, reason.as_deref(), report.as_deref()),
        Commands::Progress { phase, step } => cmd_progress(&project_dir, cli.verbose, phase, step),
        Commands::Status { run } => cmd_status(&project_dir, cli.verbose, run.as_deref()),
        Commands::Resume => cmd_resume(&project_dir, cli.verbose).await,
        Commands::History { limit } => cmd_history(&project_dir, cli.verbose, *limit),
    };

    if let Err(err) = &result {
        eprintln!("{} {err:#}", style("error:").bold().red());
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string()),
        ))
        .try_init();
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    project_dir: &std::path::Path,
    verbose: bool,
    plan_path: &std::path::Path,
    phase: Option<&str>,
    dry_run: bool,
    model: Option<String>,
    no_interactive: bool,
    allow_dirty: bool,
    no_auto_commit: bool,
) -> Result<()> {
    let _ = no_interactive;
    let cli_overrides = CliOverrides {
        model,
        no_interactive: true,
        auto_commit: if no_auto_commit { Some(false) } else { None },
    };
    let config = DebussyConfig::load(project_dir, verbose, cli_overrides)?;
    config.ensure_directories()?;

    let plan = load_plan(plan_path)?;
    let state = StateStore::open(&config.state_file)?;
    let orchestrator = Orchestrator::new(config, state, Box::new(LoggingCollaborator));

    let opts = RunOptions {
        only_phase: phase,
        dry_run,
        allow_dirty,
        auto_commit: !no_auto_commit,
        skip: HashSet::new(),
    };

    orchestrator.run(&plan, opts).await?;
    println!("{}", style("plan complete").bold().green());
    Ok(())
}

fn cmd_done(
    project_dir: &std::path::Path,
    verbose: bool,
    phase: &str,
    status: &str,
    reason: Option<&str>,
    report: Option<&str>,
) -> Result<()> {
    let config = DebussyConfig::load(project_dir, verbose, CliOverrides::default())?;
    let state = StateStore::open(&config.state_file)?;
    let run = state
        .get_current_run()?
        .context("no run in progress; start one with `debussy run`")?;
    let report = report.map(|r| {
        if serde_json::from_str::<serde_json::Value>(r).is_ok() {
            r.to_string()
        } else {
            debussy::util::extract_json_object(r).unwrap_or_else(|| r.to_string())
        }
    });
    state.record_completion_signal(&run.id, phase, status, reason, report.as_deref())?;
    println!("recorded {status} signal for phase {phase}");
    Ok(())
}

fn cmd_progress(project_dir: &std::path::Path, verbose: bool, phase: &str, step: &str) -> Result<()> {
    let config = DebussyConfig::load(project_dir, verbose, CliOverrides::default())?;
    let state = StateStore::open(&config.state_file)?;
    let run = state
        .get_current_run()?
        .context("no run in progress; start one with `debussy run`")?;
    state.log_progress(&run.id, phase, step)?;
    println!("recorded progress for phase {phase}: {step}");
    Ok(())
}

fn cmd_status(project_dir: &std::path::Path, verbose: bool, run_id: Option<&str>) -> Result<()> {
    let config = DebussyConfig::load(project_dir, verbose, CliOverrides::default())?;
    let state = StateStore::open(&config.state_file)?;

    let run = match run_id {
        Some(id) => state.get_run(id)?.with_context(|| format!("no such run: {id}"))?,
        None => state.get_current_run()?.context("no run in progress")?,
    };

    println!();
    println!("Run:     {}", run.id);
    println!("Plan:    {}", run.plan_path);
    println!("Status:  {:?}", run.status);
    if let Some(phase) = &run.current_phase {
        println!("Phase:   {phase}");
        if let Some(sig) = state.get_completion_signal(&run.id, phase)? {
            println!("Signal:  {} ({})", sig.status, sig.reason.unwrap_or_default());
        }
        let progress = state.get_progress(&run.id, phase)?;
        if !progress.is_empty() {
            println!("Progress:");
            for (step, at) in progress {
                println!("  - {} ({})", step, at.format("%Y-%m-%d %H:%M:%S"));
            }
        }
    }
    println!("Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = run.completed_at {
        println!("Ended:   {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
    Ok(())
}

async fn cmd_resume(project_dir: &std::path::Path, verbose: bool) -> Result<()> {
    let config = DebussyConfig::load(project_dir, verbose, CliOverrides::default())?;
    let state = StateStore::open(&config.state_file)?;
    let run = state
        .get_current_run()?
        .filter(|r| r.status == RunStatus::Paused || r.status == RunStatus::Running)
        .context("no paused or running run to resume")?;

    let plan = load_plan(std::path::Path::new(&run.plan_path))?;
    let orchestrator = Orchestrator::new(config, state, Box::new(LoggingCollaborator));
    orchestrator.run(&plan, RunOptions::default()).await?;
    println!("{}", style("plan complete").bold().green());
    Ok(())
}

fn cmd_history(project_dir: &std::path::Path, verbose: bool, limit: u32) -> Result<()> {
    let config = DebussyConfig::load(project_dir, verbose, CliOverrides::default())?;
    let state = StateStore::open(&config.state_file)?;
    let runs = state.list_runs(limit)?;

    if runs.is_empty() {
        println!("no runs recorded yet");
        return Ok(());
    }

    println!();
    println!("{:<38} {:<30} {:<10} {}", "Run", "Plan", "Status", "Started");
    println!("{:-<38} {:-<30} {:-<10} {:-<19}", "", "", "", "");
    for run in runs {
        println!(
            "{:<38} {:<30} {:<10} {}",
            run.id,
            run.plan_path,
            format!("{:?}", run.status).to_lowercase(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!();
    Ok(())
}
