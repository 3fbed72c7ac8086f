//! AI-DLC construction orchestrator CLI.
//!
//! Drives a DAG of construction units through a hat/iteration workflow,
//! spawning one unattended worker per pass inside isolated git worktrees.
//! Session hooks (`session-start` / `session-stop`) bridge the loop across
//! context resets of the hosting session.

use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use ai_dlc::construct::{PassOutcome, run_pass};
use ai_dlc::core::types::UnitStatus;
use ai_dlc::core::unit::reset_allowed;
use ai_dlc::elaborate::elaborate;
use ai_dlc::exit_codes;
use ai_dlc::fanout::dispatch_ready;
use ai_dlc::io::config::load_config;
use ai_dlc::io::intent::{load_intent, load_iteration_state};
use ai_dlc::io::layout::IntentPaths;
use ai_dlc::io::store::{FsStateStore, default_global_root};
use ai_dlc::io::units;
use ai_dlc::io::worker::CodexWorker;
use ai_dlc::io::worktree::WorktreeManager;
use ai_dlc::looping::{LoopStop, run_loop};
use ai_dlc::logging;
use ai_dlc::session::{HumanReason, StopDecision, on_session_start, on_session_stop};
use ai_dlc::status::{render_status, render_unit_table};

#[derive(Parser)]
#[command(
    name = "ai-dlc",
    version,
    about = "Deterministic construction orchestrator for multi-session agent work"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the intent branch/worktree, scaffold `.ai-dlc/{slug}/`, freeze
    /// the workflow.
    Elaborate {
        /// Intent slug ([a-z0-9-], also the branch/worktree handle).
        #[arg(long)]
        slug: String,
        /// Intent text inline.
        #[arg(long, conflicts_with = "intent_file")]
        intent: Option<String>,
        /// Read the intent text from a file.
        #[arg(long)]
        intent_file: Option<PathBuf>,
    },
    /// Run one bounded construction pass.
    Construct,
    /// Run construction passes until a terminal outcome.
    Loop {
        /// Bound the number of passes for this invocation (0 = unbounded).
        #[arg(long, default_value_t = 0)]
        max_passes: u32,
    },
    /// Spawn one worker per ready unit, each in its own worktree.
    Dispatch,
    /// Print intent status (iteration, hat, unit table).
    Status,
    /// List units with their statuses.
    Units,
    /// Set a unit's status (validates the value and the unit reference).
    SetStatus { unit_ref: String, status: String },
    /// Reset a blocked unit to pending (explicit human action).
    ResetUnit { unit_ref: String },
    /// Session-start hook: apply the deferred iteration increment and print
    /// the context injection.
    SessionStart,
    /// Session-stop hook: decide continue/done/halt for the next session.
    SessionStop,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Elaborate {
            slug,
            intent,
            intent_file,
        } => cmd_elaborate(&root, &slug, intent, intent_file),
        Command::Construct => cmd_construct(&root),
        Command::Loop { max_passes } => cmd_loop(&root, max_passes),
        Command::Dispatch => cmd_dispatch(&root),
        Command::Status => cmd_status(&root),
        Command::Units => cmd_units(&root),
        Command::SetStatus { unit_ref, status } => cmd_set_status(&root, &unit_ref, &status),
        Command::ResetUnit { unit_ref } => cmd_reset_unit(&root, &unit_ref),
        Command::SessionStart => cmd_session_start(&root),
        Command::SessionStop => cmd_session_stop(&root),
    }
}

fn cmd_elaborate(
    root: &Path,
    slug: &str,
    intent: Option<String>,
    intent_file: Option<PathBuf>,
) -> Result<i32> {
    let intent_text = match (intent, intent_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("read intent file {}", path.display()))?,
        (None, None) => return Err(anyhow!("provide --intent or --intent-file")),
    };
    let outcome = elaborate(root, slug, &intent_text)?;
    println!(
        "elaborated intent {} on {} ({})",
        outcome.slug,
        outcome.branch,
        outcome.worktree.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_construct(root: &Path) -> Result<i32> {
    let outcome = run_pass(root, &CodexWorker)?;
    Ok(report_pass(&outcome))
}

fn cmd_loop(root: &Path, max_passes: u32) -> Result<i32> {
    let max = (max_passes > 0).then_some(max_passes);
    let outcome = run_loop(root, &CodexWorker, max, |pass| {
        report_pass(pass);
    })?;
    println!("loop stopped after {} passes", outcome.passes_executed);
    Ok(match outcome.stop {
        LoopStop::Complete => exit_codes::COMPLETE,
        LoopStop::ElaborationRequired => exit_codes::INVALID,
        LoopStop::Deadlock { .. } => exit_codes::DEADLOCK,
        LoopStop::Blocked { .. } => exit_codes::BLOCKED,
        LoopStop::IterationCapExceeded { .. } => exit_codes::CAP_EXCEEDED,
        LoopStop::PassBudgetExhausted { .. } => exit_codes::OK,
    })
}

fn cmd_dispatch(root: &Path) -> Result<i32> {
    let report = dispatch_ready(root, &CodexWorker)?;
    println!(
        "dispatched: {} completed, {} retained, {} blocked ({} worktree failures)",
        report.completed.len(),
        report.retained.len(),
        report.blocked.len(),
        report.worktree_failures.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let (record, paths) = resolve_intent_paths(root)?;
    let wt_store = FsStateStore::new(&paths.work_root, default_global_root(root));
    let Some(state) = load_iteration_state(&wt_store)? else {
        println!("intent {} has no iteration state; elaborate first", record.slug);
        return Ok(exit_codes::INVALID);
    };
    let unit_set = units::list_units(&paths.intent_dir)?;
    print!("{}", render_status(&record, &state, &unit_set));
    Ok(exit_codes::OK)
}

fn cmd_units(root: &Path) -> Result<i32> {
    let (_, paths) = resolve_intent_paths(root)?;
    let unit_set = units::list_units(&paths.intent_dir)?;
    if unit_set.is_empty() {
        println!("no units defined");
        return Ok(exit_codes::OK);
    }
    print!("{}", render_unit_table(&unit_set));
    Ok(exit_codes::OK)
}

fn cmd_set_status(root: &Path, unit_ref: &str, status: &str) -> Result<i32> {
    let (_, paths) = resolve_intent_paths(root)?;
    units::update_status_str(&paths.intent_dir, unit_ref, status)?;
    println!("{unit_ref} -> {status}");
    Ok(exit_codes::OK)
}

fn cmd_reset_unit(root: &Path, unit_ref: &str) -> Result<i32> {
    let (_, paths) = resolve_intent_paths(root)?;
    let unit = units::load_unit_ref(&paths.intent_dir, unit_ref)?;
    if !reset_allowed(unit.status, UnitStatus::Pending) {
        return Err(anyhow!(
            "unit '{}' is {}; only blocked units can be reset",
            unit.id,
            unit.status
        ));
    }
    units::update_status(&paths.intent_dir, unit_ref, UnitStatus::Pending)?;
    println!("{} -> pending", unit.id);
    Ok(exit_codes::OK)
}

fn cmd_session_start(root: &Path) -> Result<i32> {
    match on_session_start(root)? {
        Some(ctx) => {
            print!("{}", ctx.injected);
            Ok(exit_codes::OK)
        }
        None => Ok(exit_codes::OK),
    }
}

fn cmd_session_stop(root: &Path) -> Result<i32> {
    match on_session_stop(root)? {
        None => Ok(exit_codes::OK),
        Some(StopDecision::Continue { message }) => {
            println!("{message}");
            Ok(exit_codes::OK)
        }
        Some(StopDecision::Done { message }) => {
            println!("{message}");
            Ok(exit_codes::COMPLETE)
        }
        Some(StopDecision::HumanNeeded { reason, message }) => {
            println!("{message}");
            Ok(match reason {
                HumanReason::Deadlock => exit_codes::DEADLOCK,
                HumanReason::IterationCapExceeded => exit_codes::CAP_EXCEEDED,
            })
        }
    }
}

/// Print a pass outcome and map it to an exit code.
fn report_pass(outcome: &PassOutcome) -> i32 {
    match outcome {
        PassOutcome::ElaborationRequired => {
            println!("no active intent; run `ai-dlc elaborate` first");
            exit_codes::INVALID
        }
        PassOutcome::Complete { slug } => {
            println!("intent {slug} is complete");
            exit_codes::COMPLETE
        }
        PassOutcome::IterationCapExceeded {
            slug,
            iteration,
            max_iterations,
        } => {
            println!(
                "intent {slug}: iteration cap exceeded ({iteration}/{max_iterations}); human action required"
            );
            exit_codes::CAP_EXCEEDED
        }
        PassOutcome::Deadlock {
            slug,
            iteration,
            summary,
        } => {
            println!(
                "intent {slug}: deadlock at iteration {iteration} ({} ready, {} in progress); human action required",
                summary.ready_count, summary.in_progress_count
            );
            exit_codes::DEADLOCK
        }
        PassOutcome::UnitBlocked {
            slug,
            iteration,
            hat,
            unit,
        } => {
            println!(
                "intent {slug}: {} blocked at iteration {iteration} under hat {hat}",
                unit.as_deref().unwrap_or("intent"),
            );
            exit_codes::BLOCKED
        }
        PassOutcome::Advanced {
            slug,
            iteration,
            hat,
            unit,
            worker_outcome,
            intent_complete,
        } => {
            println!(
                "intent {slug}: iteration {iteration} hat {hat} unit {} -> {}{}",
                unit.as_deref().unwrap_or("intent"),
                worker_outcome.as_str(),
                if *intent_complete { " (intent complete)" } else { "" }
            );
            if *intent_complete {
                exit_codes::COMPLETE
            } else {
                exit_codes::OK
            }
        }
    }
}

/// Resolve the active intent's record and worktree paths (the worktree is
/// materialized on first use).
fn resolve_intent_paths(root: &Path) -> Result<(ai_dlc::io::intent::IntentRecord, IntentPaths)> {
    let store = FsStateStore::new(root, default_global_root(root));
    let record = load_intent(&store)?
        .ok_or_else(|| anyhow!("no active intent (run `ai-dlc elaborate` first)"))?;
    let cfg = load_config(&root.join(".ai-dlc").join("config.toml"))?;
    let manager = WorktreeManager::new(root, &cfg.worktree_root);
    let worktree = manager.ensure_intent_worktree(&record.slug)?;
    let paths = IntentPaths::new(worktree, &record.slug);
    Ok((record, paths))
}
