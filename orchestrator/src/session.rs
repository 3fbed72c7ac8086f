//! Session lifecycle hooks bridging the orchestrator to the hosting session.
//!
//! `on_session_start` performs the deferred iteration increment and renders
//! the context injection; `on_session_stop` decides what the next session
//! should do. The two-phase `needsAdvance` flag lives between them: the stop
//! hook sets it, the next start hook consumes it, so the iteration counter
//! moves exactly once per session-reset cycle even when a session dies
//! between the hooks.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::machine;
use crate::core::types::IntentStatus;
use crate::core::unit::Unit;
use crate::io::config::load_config;
use crate::io::intent::{
    IntentRecord, load_intent, load_iteration_state, write_intent, write_iteration_state,
};
use crate::io::layout::IntentPaths;
use crate::io::store::{FsStateStore, default_global_root};
use crate::io::units;
use crate::io::worktree::WorktreeManager;
use crate::status::render_status;

/// Context injected into a fresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub slug: String,
    pub iteration: u32,
    pub hat: String,
    /// Human-readable status block to inject into the session.
    pub injected: String,
}

/// Decision rendered by the stop hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDecision {
    /// Workable units remain: the next session should run the loop again.
    Continue { message: String },
    /// Everything is complete; nothing to do.
    Done { message: String },
    /// Deadlock, blocked-only remainder, or iteration cap: a human must act.
    HumanNeeded {
        reason: HumanReason,
        message: String,
    },
}

/// Why human intervention is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumanReason {
    Deadlock,
    IterationCapExceeded,
}

/// Load state for a fresh session, applying the deferred iteration increment.
///
/// Returns `None` when no intent is active (nothing to inject).
#[instrument(skip_all, fields(root = %root.display()))]
pub fn on_session_start(root: &Path) -> Result<Option<SessionContext>> {
    let Some((record, worktree)) = resolve_intent(root)? else {
        return Ok(None);
    };
    let wt_store = FsStateStore::new(&worktree, default_global_root(root));
    let Some(mut state) = load_iteration_state(&wt_store)? else {
        return Ok(None);
    };

    if machine::consume_deferred_increment(&mut state) {
        info!(iteration = state.iteration, "applied deferred iteration increment");
        write_iteration_state(&wt_store, &state)?;
    }

    let unit_set = load_units_or_empty(&worktree, &record)?;
    let injected = render_status(&record, &state, &unit_set);
    Ok(Some(SessionContext {
        slug: record.slug.clone(),
        iteration: state.iteration,
        hat: state.hat.clone(),
        injected,
    }))
}

/// Persist the session's outcome and decide what happens next.
///
/// Returns `None` when no intent is active.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn on_session_stop(root: &Path) -> Result<Option<StopDecision>> {
    let Some((record, worktree)) = resolve_intent(root)? else {
        return Ok(None);
    };
    let store = FsStateStore::new(root, default_global_root(root));
    let wt_store = FsStateStore::new(&worktree, default_global_root(root));
    let Some(mut state) = load_iteration_state(&wt_store)? else {
        return Ok(None);
    };

    let unit_set = load_units_or_empty(&worktree, &record)?;
    let status_block = render_status(&record, &state, &unit_set);

    if state.status == IntentStatus::Complete {
        sync_intent_complete(&store, &record)?;
        return Ok(Some(StopDecision::Done {
            message: format!("intent '{}' is complete.\n\n{status_block}", record.slug),
        }));
    }

    let summary = crate::core::dag::summarize(&unit_set);
    if !unit_set.is_empty() && summary.all_complete {
        state.status = IntentStatus::Complete;
        state.current_unit = None;
        write_iteration_state(&wt_store, &state)?;
        sync_intent_complete(&store, &record)?;
        return Ok(Some(StopDecision::Done {
            message: format!(
                "all units of intent '{}' are complete.\n\n{status_block}",
                record.slug
            ),
        }));
    }

    if state.cap_reached() {
        return Ok(Some(StopDecision::HumanNeeded {
            reason: HumanReason::IterationCapExceeded,
            message: format!(
                "iteration cap reached ({} of {}); raise maxIterations or finish by hand.\n\n{status_block}",
                state.iteration,
                state.max_iterations.unwrap_or(0)
            ),
        }));
    }

    if !unit_set.is_empty() && summary.is_deadlocked() {
        return Ok(Some(StopDecision::HumanNeeded {
            reason: HumanReason::Deadlock,
            message: format!(
                "deadlock: zero ready and zero in-progress units but work remains; reset a blocked unit or edit dependencies.\n\n{status_block}"
            ),
        }));
    }

    // Workable units remain: defer the iteration increment to the next
    // session start, which is guaranteed to run.
    machine::defer_iteration_increment(&mut state);
    write_iteration_state(&wt_store, &state)?;
    debug!("continuation recorded");
    Ok(Some(StopDecision::Continue {
        message: format!(
            "intent '{}' continues next session (run `ai-dlc loop`).\n\n{status_block}",
            record.slug
        ),
    }))
}

fn resolve_intent(root: &Path) -> Result<Option<(IntentRecord, std::path::PathBuf)>> {
    let store = FsStateStore::new(root, default_global_root(root));
    let Some(record) = load_intent(&store)? else {
        return Ok(None);
    };
    let cfg = load_config(&root.join(".ai-dlc").join("config.toml"))?;
    let manager = WorktreeManager::new(root, &cfg.worktree_root);
    let worktree = manager.ensure_intent_worktree(&record.slug)?;
    Ok(Some((record, worktree)))
}

fn load_units_or_empty(worktree: &Path, record: &IntentRecord) -> Result<Vec<Unit>> {
    let paths = IntentPaths::new(worktree, &record.slug);
    if !paths.intent_dir.exists() {
        return Ok(Vec::new());
    }
    units::list_units(&paths.intent_dir)
}

fn sync_intent_complete<S: crate::io::store::StateStore>(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UnitStatus;
    use crate::test_support::{TestRepo, unit};

    #[test]
    fn hooks_are_noops_without_an_intent() {
        let repo = TestRepo::new().expect("repo");
        assert_eq!(on_session_start(repo.root()).expect("start"), None);
        assert_eq!(on_session_stop(repo.root()).expect("stop"), None);
    }

    #[test]
    fn stop_then_start_increments_iteration_exactly_once() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("cycle").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "cycle",
            &[unit("unit-01-core", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let decision = on_session_stop(repo.root()).expect("stop").expect("some");
        assert!(matches!(decision, StopDecision::Continue { .. }));

        let ctx = on_session_start(repo.root()).expect("start").expect("some");
        assert_eq!(ctx.iteration, 2);

        // A second start without an intervening stop must not increment again.
        let ctx = on_session_start(repo.root()).expect("start").expect("some");
        assert_eq!(ctx.iteration, 2);
    }

    #[test]
    fn start_injects_readable_status() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("inject").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "inject",
            &[unit("unit-01-core", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let ctx = on_session_start(repo.root()).expect("start").expect("some");
        assert_eq!(ctx.hat, "elaborator");
        assert!(ctx.injected.contains("intent: inject"));
        assert!(ctx.injected.contains("unit-01-core"));
        assert!(ctx.injected.contains("1 ready"));
    }

    #[test]
    fn stop_reports_deadlock_as_human_needed() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("dead").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "dead",
            &[unit("unit-01-core", &[], UnitStatus::Blocked)],
        )
        .expect("seed");

        let decision = on_session_stop(repo.root()).expect("stop").expect("some");
        match decision {
            StopDecision::HumanNeeded { reason, message } => {
                assert_eq!(reason, HumanReason::Deadlock);
                assert!(message.contains("deadlock"));
                assert!(message.contains("0 ready"));
            }
            other => panic!("expected HumanNeeded, got {other:?}"),
        }
    }

    #[test]
    fn stop_reports_done_when_all_units_complete() {
        let repo = TestRepo::new().expect("repo");
        let elaborated = repo.elaborate_intent("alldone").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "alldone",
            &[unit("unit-01-core", &[], UnitStatus::Completed)],
        )
        .expect("seed");

        let decision = on_session_stop(repo.root()).expect("stop").expect("some");
        assert!(matches!(decision, StopDecision::Done { .. }));

        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        let record = load_intent(&store).expect("load").expect("record");
        assert_eq!(record.status, IntentStatus::Complete);
    }

    #[test]
    fn stop_reports_cap_exceeded_as_human_needed() {
        let repo = TestRepo::new().expect("repo");
        let mut cfg = crate::io::config::OrchestratorConfig::default();
        cfg.worktree_root = repo.worktree_root();
        cfg.max_iterations = 2;
        repo.write_config(&cfg).expect("config");

        let elaborated = repo.elaborate_intent("capped").expect("elaborate");
        repo.seed_units(
            &elaborated.worktree,
            "capped",
            &[unit("unit-01-core", &[], UnitStatus::Pending)],
        )
        .expect("seed");

        let wt_store = FsStateStore::new(&elaborated.worktree, repo.global_state_root());
        let mut state = load_iteration_state(&wt_store)
            .expect("load")
            .expect("state");
        state.iteration = 2;
        write_iteration_state(&wt_store, &state).expect("write");

        let decision = on_session_stop(repo.root()).expect("stop").expect("some");
        match decision {
            StopDecision::HumanNeeded { reason, message } => {
                assert_eq!(reason, HumanReason::IterationCapExceeded);
                assert!(message.contains("iteration cap reached"));
            }
            other => panic!("expected HumanNeeded, got {other:?}"),
        }
    }
}
