//! Orchestration for a single bounded construction pass.
//!
//! One invocation performs at most one worker execution and one state-machine
//! transition, then returns. Everything the pass needs to resume after a
//! session reset is on disk before the worker is spawned: the unit is marked
//! `in_progress` and the iteration state names it as current, so an
//! interruption mid-work never reverts the unit to `pending`.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::dag::{self, DagSummary};
use crate::core::machine::{self, AdvanceEffect, IterationState};
use crate::core::naming::{intent_branch, unit_branch};
use crate::core::types::{IntentStatus, UnitStatus, WorkerOutcome};
use crate::core::unit::Unit;
use crate::io::blocker::{write_intent_blocker, write_unit_blocker};
use crate::io::config::load_config;
use crate::io::git::Git;
use crate::io::intent::{
    IntentRecord, load_intent, load_iteration_state, write_intent, write_iteration_state,
};
use crate::io::layout::IntentPaths;
use crate::io::prompt::{PromptBuilder, WorkerContext};
use crate::io::run_log::{PassMeta, next_pass_dir, write_pass};
use crate::io::store::{FsStateStore, default_global_root};
use crate::io::units;
use crate::io::worker::{Worker, WorkerRequest, execute_and_load};
use crate::io::worktree::{WorktreeError, WorktreeManager};
use crate::status::render_unit_table;

/// Result of one construction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// No intent record or no iteration state: run `ai-dlc elaborate` first.
    ElaborationRequired,
    /// The intent is complete; the pass was a no-op (or finalized completion).
    Complete { slug: String },
    /// The iteration safety valve fired; human action required.
    IterationCapExceeded {
        slug: String,
        iteration: u32,
        max_iterations: u32,
    },
    /// Zero ready, zero in progress, work remaining; human action required.
    Deadlock {
        slug: String,
        iteration: u32,
        summary: DagSummary,
    },
    /// The target unit is blocked (worker report or worktree failure); the
    /// loop halted without a state-machine transition.
    UnitBlocked {
        slug: String,
        iteration: u32,
        hat: String,
        unit: Option<String>,
    },
    /// A worker ran and its outcome drove a transition.
    Advanced {
        slug: String,
        iteration: u32,
        /// Hat that was active while the worker ran.
        hat: String,
        unit: Option<String>,
        worker_outcome: WorkerOutcome,
        intent_complete: bool,
    },
}

/// Execute one bounded pass of the construction loop.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_pass<W: Worker + ?Sized>(root: &Path, worker: &W) -> Result<PassOutcome> {
    let start = Instant::now();

    let store = FsStateStore::new(root, default_global_root(root));
    let Some(record) = load_intent(&store)? else {
        debug!("no intent record");
        return Ok(PassOutcome::ElaborationRequired);
    };
    if record.status == IntentStatus::Complete {
        return Ok(PassOutcome::Complete {
            slug: record.slug.clone(),
        });
    }

    let cfg = load_config(&root.join(".ai-dlc").join("config.toml"))?;
    let manager = WorktreeManager::new(root, &cfg.worktree_root);
    let worktree = manager
        .ensure_intent_worktree(&record.slug)
        .with_context(|| format!("ensure intent worktree for {}", record.slug))?;

    let wt_store = FsStateStore::new(&worktree, default_global_root(root));
    let Some(mut state) = load_iteration_state(&wt_store)? else {
        debug!("no iteration state on intent branch");
        return Ok(PassOutcome::ElaborationRequired);
    };
    if state.status == IntentStatus::Complete {
        mark_intent_complete(&store, &record)?;
        return Ok(PassOutcome::Complete {
            slug: record.slug.clone(),
        });
    }

    // The worktree carries its own committed config; worker knobs come from
    // there so unit worktrees branched off the intent see the same values.
    let wt_cfg = load_config(&worktree.join(".ai-dlc").join("config.toml"))?;

    if state.cap_reached() {
        warn!(iteration = state.iteration, "iteration cap reached");
        return Ok(PassOutcome::IterationCapExceeded {
            slug: record.slug.clone(),
            iteration: state.iteration,
            max_iterations: state.max_iterations.unwrap_or(0),
        });
    }

    let paths = IntentPaths::new(&worktree, &record.slug);
    let mut unit_set = units::list_units(&paths.intent_dir)?;
    let summary = dag::summarize(&unit_set);

    if !unit_set.is_empty() && summary.all_complete {
        state.status = IntentStatus::Complete;
        state.current_unit = None;
        write_iteration_state(&wt_store, &state)?;
        mark_intent_complete(&store, &record)?;
        return Ok(PassOutcome::Complete {
            slug: record.slug.clone(),
        });
    }

    if summary.is_deadlocked() {
        warn!(?summary, "unit DAG deadlocked");
        return Ok(PassOutcome::Deadlock {
            slug: record.slug.clone(),
            iteration: state.iteration,
            summary,
        });
    }

    // Target selection: the current unit if still in progress, else the first
    // ready unit. An intent without units runs the worker against the intent
    // arena itself (elaborator/planner hats author the unit files).
    let target = select_target(&state, &unit_set);
    let (workdir, branch) = match &target {
        Some(unit_id) => {
            match manager.ensure_unit_worktree(&record.slug, unit_id) {
                Ok(path) => (path, unit_branch(&record.slug, unit_id)),
                Err(err) if err.downcast_ref::<WorktreeError>().is_some() => {
                    return abort_unit_on_worktree_failure(
                        &paths, &wt_store, &record, &mut state, unit_id, err,
                    );
                }
                Err(err) => return Err(err),
            }
        }
        None => (worktree.clone(), intent_branch(&record.slug)),
    };

    if let Some(unit_id) = &target {
        let unit = find_unit(&unit_set, unit_id)?;
        if unit.status == UnitStatus::Pending {
            units::update_status(&paths.intent_dir, unit_id, UnitStatus::InProgress)?;
            set_status(&mut unit_set, unit_id, UnitStatus::InProgress);
        }
        state.current_unit = Some(unit_id.clone());
    }
    // Persist before spawning: an interruption mid-work must still show that
    // work started.
    write_iteration_state(&wt_store, &state)?;

    let hat_at_work = state.hat.clone();
    let prompt = build_prompt(&wt_cfg, &paths, &state, &unit_set, &target, &workdir, &branch)?;

    let pass_paths = next_pass_dir(&paths.runs_dir, &record.slug)?;
    let request = WorkerRequest {
        workdir,
        prompt: prompt.clone(),
        report_path: pass_paths.report_path.clone(),
        log_path: pass_paths.worker_log_path.clone(),
        timeout: Duration::from_secs(wt_cfg.worker_timeout_secs),
        output_limit_bytes: wt_cfg.worker_output_limit_bytes,
    };
    info!(hat = %hat_at_work, unit = ?target, "spawning worker");
    let report = execute_and_load(worker, &request)?;

    let outcome = match report.outcome {
        WorkerOutcome::Completed => {
            let units_arg = (!unit_set.is_empty()).then_some(unit_set.as_mut_slice());
            let effect = machine::advance(&mut state, units_arg)
                .map_err(|err| anyhow!("advance failed: {err}"))?;
            persist_completed_unit(&paths, &effect)?;
            let intent_complete = state.status == IntentStatus::Complete;
            if intent_complete {
                mark_intent_complete(&store, &record)?;
            }
            PassOutcome::Advanced {
                slug: record.slug.clone(),
                iteration: state.iteration,
                hat: hat_at_work.clone(),
                unit: target.clone(),
                worker_outcome: WorkerOutcome::Completed,
                intent_complete,
            }
        }
        WorkerOutcome::IssuesFound => {
            machine::fail(&mut state)?;
            PassOutcome::Advanced {
                slug: record.slug.clone(),
                iteration: state.iteration,
                hat: hat_at_work.clone(),
                unit: target.clone(),
                worker_outcome: WorkerOutcome::IssuesFound,
                intent_complete: false,
            }
        }
        WorkerOutcome::Blocked => {
            match &target {
                Some(unit_id) => {
                    units::update_status(&paths.intent_dir, unit_id, UnitStatus::Blocked)?;
                    write_unit_blocker(&paths, unit_id, &hat_at_work, &report.notes)?;
                }
                None => {
                    write_intent_blocker(&paths, &hat_at_work, &report.notes)?;
                }
            }
            state.current_unit = None;
            PassOutcome::UnitBlocked {
                slug: record.slug.clone(),
                iteration: state.iteration,
                hat: hat_at_work.clone(),
                unit: target.clone(),
            }
        }
    };
    write_iteration_state(&wt_store, &state)?;

    let meta = PassMeta {
        slug: record.slug.clone(),
        iteration: state.iteration,
        hat: hat_at_work,
        unit: target.clone().unwrap_or_else(|| "intent".to_string()),
        outcome: report.outcome,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    write_pass(&pass_paths, &meta, &prompt, &report)?;

    commit_pass(&worktree, &meta)?;
    Ok(outcome)
}

fn select_target(state: &IterationState, unit_set: &[Unit]) -> Option<String> {
    if let Some(current) = &state.current_unit
        && unit_set
            .iter()
            .any(|u| &u.id == current && u.status == UnitStatus::InProgress)
    {
        return Some(current.clone());
    }
    let ready = dag::ready_units(unit_set);
    if let Some(first) = ready.first() {
        return Some(first.id.clone());
    }
    let in_progress = dag::in_progress_units(unit_set);
    in_progress.first().map(|u| u.id.clone())
}

fn find_unit<'a>(unit_set: &'a [Unit], id: &str) -> Result<&'a Unit> {
    unit_set
        .iter()
        .find(|u| u.id == id)
        .ok_or_else(|| anyhow!("selected unit '{id}' not found"))
}

fn set_status(unit_set: &mut [Unit], id: &str, status: UnitStatus) {
    if let Some(unit) = unit_set.iter_mut().find(|u| u.id == id) {
        unit.status = status;
    }
}

fn persist_completed_unit(paths: &IntentPaths, effect: &AdvanceEffect) -> Result<()> {
    let finished = match effect {
        AdvanceEffect::UnitCompleted { unit, .. } => Some(unit),
        AdvanceEffect::Complete { finished_unit } | AdvanceEffect::Stalled { finished_unit } => {
            finished_unit.as_ref()
        }
        AdvanceEffect::NextHat { .. } => None,
    };
    if let Some(unit) = finished {
        units::update_status(&paths.intent_dir, unit, UnitStatus::Completed)?;
    }
    Ok(())
}

/// Worktree creation failed for one unit: record a blocker, take the unit out
/// of the ready pool, and halt this pass. Other ready units proceed on later
/// passes.
fn abort_unit_on_worktree_failure<S: crate::io::store::StateStore>(
    paths: &IntentPaths,
    wt_store: &S,
    record: &IntentRecord,
    state: &mut IterationState,
    unit_id: &str,
    err: anyhow::Error,
) -> Result<PassOutcome> {
    warn!(unit = unit_id, err = %err, "unit worktree failed");
    write_unit_blocker(
        paths,
        unit_id,
        &state.hat,
        &format!("worktree creation failed: {err:#}"),
    )?;
    units::update_status(&paths.intent_dir, unit_id, UnitStatus::Blocked)?;
    if state.current_unit.as_deref() == Some(unit_id) {
        state.current_unit = None;
    }
    write_iteration_state(wt_store, state)?;
    Ok(PassOutcome::UnitBlocked {
        slug: record.slug.clone(),
        iteration: state.iteration,
        hat: state.hat.clone(),
        unit: Some(unit_id.to_string()),
    })
}

#[allow(clippy::too_many_arguments)]
fn build_prompt(
    cfg: &crate::io::config::OrchestratorConfig,
    paths: &IntentPaths,
    state: &IterationState,
    unit_set: &[Unit],
    target: &Option<String>,
    workdir: &Path,
    branch: &str,
) -> Result<String> {
    let intent_text = read_or_empty(&paths.intent_doc_path);
    let plan = read_or_empty(&paths.plan_path);
    let criteria = match target {
        Some(unit_id) => find_unit(unit_set, unit_id)?.criteria.clone(),
        None => intent_text.clone(),
    };
    let unit_table = if unit_set.is_empty() {
        String::new()
    } else {
        render_unit_table(unit_set)
    };

    let ctx = WorkerContext {
        role_instructions: cfg.hat_instructions(&state.hat).to_string(),
        intent: intent_text,
        criteria,
        plan,
        unit_table,
        worktree_path: workdir.display().to_string(),
        branch: branch.to_string(),
    };
    let pack = PromptBuilder::new(cfg.prompt_budget_bytes).build(&ctx)?;
    Ok(pack.render())
}

fn read_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

fn mark_intent_complete<S: crate::io::store::StateStore>(
    store: &S,
    record: &IntentRecord,
) -> Result<()> {
    if record.status == IntentStatus::Complete {
        return Ok(());
    }
    let mut updated = record.clone();
    updated.status = IntentStatus::Complete;
    write_intent(store, &updated)
}

fn commit_pass(worktree: &Path, meta: &PassMeta) -> Result<()> {
    let git = Git::new(worktree);
    git.add_all()?;
    let msg = format!(
        "chore(ai-dlc): pass iter {} hat {} unit {} outcome={}",
        meta.iteration,
        meta.hat,
        meta.unit,
        meta.outcome.as_str()
    );
    // Passes that change nothing tracked (e.g. issuesFound with state-only
    // updates) legitimately produce no commit.
    let _committed = git.commit_staged(&msg)?;
    Ok(())
}
