//! Multi-pass looping helper for `ai-dlc loop`.
//!
//! Runs construction passes back to back within one session until a terminal
//! outcome surfaces. The iteration counter does not move here; it only
//! advances across session resets via the session hooks.

use std::path::Path;

use anyhow::Result;

use crate::construct::{PassOutcome, run_pass};
use crate::core::dag::DagSummary;
use crate::io::worker::Worker;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The intent is complete.
    Complete,
    /// No intent/iteration state; elaborate first.
    ElaborationRequired,
    /// The unit DAG is deadlocked.
    Deadlock { summary: DagSummary },
    /// A unit (or the intent itself) reported blocked.
    Blocked { unit: Option<String> },
    /// The iteration safety valve fired.
    IterationCapExceeded { iteration: u32, max_iterations: u32 },
    /// The configured pass budget for this invocation ran out.
    PassBudgetExhausted { max_passes: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub passes_executed: u32,
    pub stop: LoopStop,
}

/// Run construction passes until a terminal outcome.
///
/// `max_passes` bounds this invocation (`None` = unbounded); the per-intent
/// `maxIterations` valve is enforced inside each pass regardless.
pub fn run_loop<W: Worker, F: FnMut(&PassOutcome)>(
    root: &Path,
    worker: &W,
    max_passes: Option<u32>,
    mut on_pass: F,
) -> Result<LoopOutcome> {
    let mut passes_executed = 0u32;
    loop {
        if let Some(max) = max_passes
            && passes_executed >= max
        {
            return Ok(LoopOutcome {
                passes_executed,
                stop: LoopStop::PassBudgetExhausted { max_passes: max },
            });
        }

        let outcome = run_pass(root, worker)?;
        if matches!(outcome, PassOutcome::Advanced { .. } | PassOutcome::UnitBlocked { .. }) {
            passes_executed += 1;
        }
        on_pass(&outcome);

        match outcome {
            PassOutcome::Advanced {
                intent_complete: false,
                ..
            } => continue,
            PassOutcome::Advanced {
                intent_complete: true,
                ..
            }
            | PassOutcome::Complete { .. } => {
                return Ok(LoopOutcome {
                    passes_executed,
                    stop: LoopStop::Complete,
                });
            }
            PassOutcome::ElaborationRequired => {
                return Ok(LoopOutcome {
                    passes_executed,
                    stop: LoopStop::ElaborationRequired,
                });
            }
            PassOutcome::Deadlock { summary, .. } => {
                return Ok(LoopOutcome {
                    passes_executed,
                    stop: LoopStop::Deadlock { summary },
                });
            }
            PassOutcome::UnitBlocked { unit, .. } => {
                return Ok(LoopOutcome {
                    passes_executed,
                    stop: LoopStop::Blocked { unit },
                });
            }
            PassOutcome::IterationCapExceeded {
                iteration,
                max_iterations,
                ..
            } => {
                return Ok(LoopOutcome {
                    passes_executed,
                    stop: LoopStop::IterationCapExceeded {
                        iteration,
                        max_iterations,
                    },
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{UnitStatus, WorkerOutcome, WorkerReport};
    use crate::io::intent::load_iteration_state;
    use crate::io::store::FsStateStore;
    use crate::io::units;
    use crate::test_support::{ScriptedWorker, TestRepo, unit};

    fn report(outcome: WorkerOutcome) -> WorkerReport {
        WorkerReport {
            outcome,
            notes: "scripted".to_string(),
        }
    }

    /// Scenario: workflow [elaborator,planner,builder,reviewer], one unit,
    /// reviewer reports issuesFound once, then completed. The unit ends
    /// `completed` and the intent reaches `complete`.
    #[test]
    fn reviewer_rejection_retries_builder_then_completes() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("omega").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "omega",
            &[unit("unit-01-only", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let worker = ScriptedWorker::new(vec![
            report(WorkerOutcome::Completed),   // elaborator
            report(WorkerOutcome::Completed),   // planner
            report(WorkerOutcome::Completed),   // builder
            report(WorkerOutcome::IssuesFound), // reviewer -> back to builder
            report(WorkerOutcome::Completed),   // builder again
            report(WorkerOutcome::Completed),   // reviewer -> unit done, intent complete
        ]);

        let outcome = run_loop(repo.root(), &worker, None, |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.passes_executed, 6);
        assert_eq!(worker.remaining(), 0);

        let units_after = units::list_units(&elaborated.worktree.join(".ai-dlc/omega"))
            .expect("units");
        assert_eq!(units_after[0].status, UnitStatus::Completed);

        let wt_store = FsStateStore::new(&elaborated.worktree, repo.global_state_root());
        let state = load_iteration_state(&wt_store)
            .expect("load")
            .expect("state");
        assert_eq!(state.status, crate::core::types::IntentStatus::Complete);
    }

    /// Scenario: unit-02 depends on unit-01; the loop works unit-01 through
    /// the whole workflow first, then unit-02.
    #[test]
    fn dependency_ordering_schedules_unit_01_first() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("ordered").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "ordered",
            &[
                unit("unit-01-core", &[], UnitStatus::Pending),
                unit("unit-02-api", &["unit-01-core"], UnitStatus::Pending),
            ],
        )
        .expect("seed");

        // 4 hats per unit, all completed: 8 passes total.
        let worker = ScriptedWorker::new(vec![report(WorkerOutcome::Completed); 8]);

        let mut touched = Vec::new();
        let outcome = run_loop(repo.root(), &worker, None, |pass| {
            if let PassOutcome::Advanced { unit: Some(u), .. } = pass {
                touched.push(u.clone());
            }
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.passes_executed, 8);
        assert!(touched[..4].iter().all(|u| u == "unit-01-core"));
        assert!(touched[4..].iter().all(|u| u == "unit-02-api"));
    }

    #[test]
    fn loop_stops_on_blocked_unit() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("stuck").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "stuck",
            &[unit("unit-01-core", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let worker = ScriptedWorker::new(vec![
            report(WorkerOutcome::Completed),
            report(WorkerOutcome::Blocked),
        ]);
        let outcome = run_loop(repo.root(), &worker, None, |_| {}).expect("loop");
        assert_eq!(
            outcome.stop,
            LoopStop::Blocked {
                unit: Some("unit-01-core".to_string())
            }
        );
        assert_eq!(outcome.passes_executed, 2);
    }

    #[test]
    fn loop_respects_pass_budget() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("budget").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "budget",
            &[unit("unit-01-core", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let worker = ScriptedWorker::new(vec![report(WorkerOutcome::Completed); 10]);
        let outcome = run_loop(repo.root(), &worker, Some(2), |_| {}).expect("loop");
        assert_eq!(
            outcome.stop,
            LoopStop::PassBudgetExhausted { max_passes: 2 }
        );
        assert_eq!(outcome.passes_executed, 2);
    }
}
