//! Fan-out dispatch: one out-of-process worker per ready unit.
//!
//! When several units are simultaneously ready they can run in parallel, each
//! bound to its own worktree. Workers share no mutable state; the only files
//! touched per unit are that unit's own. Fan-out never writes the iteration
//! state; only the single-worker pass drives hat transitions.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::naming::unit_branch;
use crate::core::types::{IntentStatus, UnitStatus, WorkerOutcome, WorkerReport};
use crate::io::blocker::write_unit_blocker;
use crate::io::config::load_config;
use crate::io::git::Git;
use crate::io::intent::{load_intent, load_iteration_state};
use crate::io::layout::IntentPaths;
use crate::io::prompt::{PromptBuilder, WorkerContext};
use crate::io::run_log::{PassMeta, PassPaths, next_pass_dir, write_pass};
use crate::io::store::{FsStateStore, default_global_root};
use crate::io::units;
use crate::io::worker::{Worker, WorkerRequest, execute_and_load};
use crate::io::worktree::WorktreeManager;
use crate::status::render_unit_table;

/// Per-unit results of one fan-out dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: Vec<String>,
    /// Units that reported `issuesFound` (or whose worker errored); they stay
    /// `in_progress` and are retried later.
    pub retained: Vec<String>,
    pub blocked: Vec<String>,
    /// Units whose worktree could not be created (also counted in `blocked`).
    pub worktree_failures: Vec<String>,
}

struct DispatchJob {
    unit_id: String,
    request: WorkerRequest,
    pass_paths: PassPaths,
    prompt: String,
}

/// Spawn one worker per ready unit and apply their terminal outcomes.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn dispatch_ready<W: Worker + Sync>(root: &Path, worker: &W) -> Result<DispatchReport> {
    let store = FsStateStore::new(root, default_global_root(root));
    let record = load_intent(&store)?
        .ok_or_else(|| anyhow!("no active intent (run `ai-dlc elaborate` first)"))?;
    if record.status == IntentStatus::Complete {
        return Ok(DispatchReport::default());
    }

    let cfg = load_config(&root.join(".ai-dlc").join("config.toml"))?;
    let manager = WorktreeManager::new(root, &cfg.worktree_root);
    let worktree = manager.ensure_intent_worktree(&record.slug)?;
    let wt_store = FsStateStore::new(&worktree, default_global_root(root));
    let state = load_iteration_state(&wt_store)?
        .ok_or_else(|| anyhow!("no iteration state (run `ai-dlc elaborate` first)"))?;
    let wt_cfg = load_config(&worktree.join(".ai-dlc").join("config.toml"))?;

    let paths = IntentPaths::new(&worktree, &record.slug);
    let unit_set = units::list_units(&paths.intent_dir)?;
    let ready: Vec<String> = crate::core::dag::ready_units(&unit_set)
        .iter()
        .map(|u| u.id.clone())
        .collect();

    let mut report = DispatchReport::default();
    let mut jobs = Vec::new();

    let intent_text = std::fs::read_to_string(&paths.intent_doc_path).unwrap_or_default();
    let plan = std::fs::read_to_string(&paths.plan_path).unwrap_or_default();
    let unit_table = render_unit_table(&unit_set);
    let role = wt_cfg.hat_instructions(&state.hat).to_string();

    for unit_id in &ready {
        let unit_worktree = match manager.ensure_unit_worktree(&record.slug, unit_id) {
            Ok(path) => path,
            Err(err) => {
                warn!(unit = %unit_id, err = %err, "unit worktree failed; aborting this unit only");
                write_unit_blocker(
                    &paths,
                    unit_id,
                    &state.hat,
                    &format!("worktree creation failed: {err:#}"),
                )?;
                units::update_status(&paths.intent_dir, unit_id, UnitStatus::Blocked)?;
                report.worktree_failures.push(unit_id.clone());
                report.blocked.push(unit_id.clone());
                continue;
            }
        };

        units::update_status(&paths.intent_dir, unit_id, UnitStatus::InProgress)?;

        let criteria = unit_set
            .iter()
            .find(|u| &u.id == unit_id)
            .map(|u| u.criteria.clone())
            .unwrap_or_default();
        let ctx = WorkerContext {
            role_instructions: role.clone(),
            intent: intent_text.clone(),
            criteria,
            plan: plan.clone(),
            unit_table: unit_table.clone(),
            worktree_path: unit_worktree.display().to_string(),
            branch: unit_branch(&record.slug, unit_id),
        };
        let prompt = PromptBuilder::new(wt_cfg.prompt_budget_bytes)
            .build(&ctx)?
            .render();

        let pass_paths = next_pass_dir(&paths.runs_dir, &record.slug)?;
        jobs.push(DispatchJob {
            unit_id: unit_id.clone(),
            request: WorkerRequest {
                workdir: unit_worktree,
                prompt: prompt.clone(),
                report_path: pass_paths.report_path.clone(),
                log_path: pass_paths.worker_log_path.clone(),
                timeout: Duration::from_secs(wt_cfg.worker_timeout_secs),
                output_limit_bytes: wt_cfg.worker_output_limit_bytes,
            },
            pass_paths,
            prompt,
        });
    }

    info!(workers = jobs.len(), "dispatching ready units");
    let results: Vec<(usize, Result<WorkerReport>)> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .iter()
            .map(|job| scope.spawn(move || execute_and_load(worker, &job.request)))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(idx, handle)| {
                let result = handle
                    .join()
                    .map_err(|_| anyhow!("worker thread panicked"))
                    .and_then(|r| r);
                (idx, result)
            })
            .collect()
    });

    for (idx, result) in results {
        let job = &jobs[idx];
        match result {
            Ok(worker_report) => {
                apply_unit_outcome(&paths, &state.hat, &job.unit_id, &worker_report, &mut report)?;
                let meta = PassMeta {
                    slug: record.slug.clone(),
                    iteration: state.iteration,
                    hat: state.hat.clone(),
                    unit: job.unit_id.clone(),
                    outcome: worker_report.outcome,
                    duration_ms: 0,
                };
                write_pass(&job.pass_paths, &meta, &job.prompt, &worker_report)?;
            }
            Err(err) => {
                warn!(unit = %job.unit_id, err = %err, "worker failed; unit retained");
                report.retained.push(job.unit_id.clone());
            }
        }
    }

    let git = Git::new(&worktree);
    git.add_all()?;
    let _committed = git.commit_staged(&format!(
        "chore(ai-dlc): dispatch {} ready units for {}",
        jobs.len(),
        record.slug
    ))?;

    Ok(report)
}

fn apply_unit_outcome(
    paths: &IntentPaths,
    hat: &str,
    unit_id: &str,
    worker_report: &WorkerReport,
    report: &mut DispatchReport,
) -> Result<()> {
    match worker_report.outcome {
        WorkerOutcome::Completed => {
            units::update_status(&paths.intent_dir, unit_id, UnitStatus::Completed)?;
            report.completed.push(unit_id.to_string());
        }
        WorkerOutcome::IssuesFound => {
            report.retained.push(unit_id.to_string());
        }
        WorkerOutcome::Blocked => {
            units::update_status(&paths.intent_dir, unit_id, UnitStatus::Blocked)?;
            write_unit_blocker(paths, unit_id, hat, &worker_report.notes)?;
            report.blocked.push(unit_id.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedWorker, TestRepo, unit};

    #[test]
    fn dispatch_runs_one_worker_per_ready_unit() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("fan").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "fan",
            &[
                unit("unit-01-a", &[], UnitStatus::Pending),
                unit("unit-02-b", &[], UnitStatus::Pending),
                unit("unit-03-c", &["unit-01-a"], UnitStatus::Pending),
            ],
        )
        .expect("seed");

        let worker = ScriptedWorker::new(vec![
            WorkerReport {
                outcome: WorkerOutcome::Completed,
                notes: "done".to_string(),
            };
            2
        ]);
        let report = dispatch_ready(repo.root(), &worker).expect("dispatch");

        let mut completed = report.completed.clone();
        completed.sort();
        assert_eq!(
            completed,
            vec!["unit-01-a".to_string(), "unit-02-b".to_string()]
        );
        assert!(report.blocked.is_empty());
        assert_eq!(worker.remaining(), 0);

        // unit-03 was not ready and is untouched.
        let units_after =
            units::list_units(&elaborated.worktree.join(".ai-dlc/fan")).expect("units");
        let by_id: std::collections::HashMap<_, _> = units_after
            .iter()
            .map(|u| (u.id.as_str(), u.status))
            .collect();
        assert_eq!(by_id["unit-01-a"], UnitStatus::Completed);
        assert_eq!(by_id["unit-02-b"], UnitStatus::Completed);
        assert_eq!(by_id["unit-03-c"], UnitStatus::Pending);
    }

    #[test]
    fn worktree_failure_aborts_only_the_affected_unit() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("fanfail").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "fanfail",
            &[
                unit("unit-01-a", &[], UnitStatus::Pending),
                unit("unit-02-b", &[], UnitStatus::Pending),
            ],
        )
        .expect("seed");

        // Occupy unit-01's worktree path so its creation collides.
        let clash = crate::core::naming::unit_worktree(
            &repo.worktree_root(),
            "fanfail",
            "unit-01-a",
        );
        std::fs::create_dir_all(&clash).expect("occupy path");

        let worker = ScriptedWorker::new(vec![WorkerReport {
            outcome: WorkerOutcome::Completed,
            notes: "done".to_string(),
        }]);
        let report = dispatch_ready(repo.root(), &worker).expect("dispatch");

        assert_eq!(report.worktree_failures, vec!["unit-01-a".to_string()]);
        assert_eq!(report.completed, vec!["unit-02-b".to_string()]);

        let blocker = elaborated
            .worktree
            .join(".ai-dlc/fanfail/blockers/unit-01-a.md");
        assert!(blocker.is_file());
    }
}
