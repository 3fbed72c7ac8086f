//! Orchestration for elaborating a new intent.
//!
//! Elaboration creates the intent's isolated arena: the `ai-dlc/{slug}`
//! branch plus worktree, the `.ai-dlc/{slug}/` scaffolding inside it, the
//! repo-scoped intent record, and the branch-scoped iteration state with the
//! workflow frozen. Re-running for the same slug resumes instead of
//! resetting.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::machine::IterationState;
use crate::core::naming::{intent_branch, validate_slug};
use crate::core::types::{ConfigurationError, IntentStatus};
use crate::io::config::{load_config, write_config};
use crate::io::git::Git;
use crate::io::intent::{IntentRecord, load_intent, load_iteration_state, write_intent, write_iteration_state};
use crate::io::layout::{IntentPaths, scaffold_intent};
use crate::io::store::{FsStateStore, default_global_root};
use crate::io::worktree::WorktreeManager;

/// Outcome of `ai-dlc elaborate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElaborateOutcome {
    pub slug: String,
    pub branch: String,
    pub worktree: std::path::PathBuf,
}

/// Elaborate (or resume) the intent `slug` from the primary checkout `root`.
pub fn elaborate(root: &Path, slug: &str, intent_text: &str) -> Result<ElaborateOutcome> {
    debug!(root = %root.display(), slug, "elaborating intent");
    validate_slug(slug).map_err(|err| anyhow::Error::new(ConfigurationError::new(err)))?;

    let cfg = load_config(&root.join(".ai-dlc").join("config.toml"))?;

    // Exactly one active workflow instance per repository. A different active
    // intent must finish (or be completed by hand) first.
    let store = FsStateStore::new(root, default_global_root(root));
    if let Some(existing) = load_intent(&store)?
        && existing.status == IntentStatus::Active
        && existing.slug != slug
    {
        return Err(anyhow!(
            "intent '{}' is still active; complete it before elaborating '{slug}'",
            existing.slug
        ));
    }

    // Refuse to proceed if the primary checkout has non-orchestrator changes,
    // to avoid mixing user work into the intent bootstrap.
    let git = Git::new(root);
    git.ensure_clean_except_prefixes(&[".ai-dlc/"])?;

    let branch = intent_branch(slug);
    let manager = WorktreeManager::new(root, &cfg.worktree_root);
    let worktree = manager.ensure_intent_worktree(slug)?;

    let paths = scaffold_intent(&worktree, slug, intent_text)?;
    ensure_worktree_config(&paths, &cfg)?;

    write_intent(
        &store,
        &IntentRecord {
            slug: slug.to_string(),
            branch: branch.clone(),
            status: IntentStatus::Active,
        },
    )?;

    // Keep an existing iteration state (resume); otherwise freeze the
    // workflow into a fresh one.
    let wt_store = FsStateStore::new(&worktree, default_global_root(root));
    if load_iteration_state(&wt_store)?.is_none() {
        let state = IterationState::new(cfg.hat_names(), cfg.max_iterations_opt())
            .map_err(|err| anyhow::Error::new(ConfigurationError::new(err)))?;
        write_iteration_state(&wt_store, &state)?;
    }

    let wt_git = Git::new(&worktree);
    wt_git.add_all()?;
    let _committed = wt_git
        .commit_staged(&format!("chore(ai-dlc): elaborate intent {slug}"))
        .context("commit intent bootstrap")?;

    info!(slug, branch = %branch, worktree = %worktree.display(), "intent elaborated");
    Ok(ElaborateOutcome {
        slug: slug.to_string(),
        branch,
        worktree,
    })
}

/// The worktree carries its own committed config so every later pass (and
/// every unit worktree branched from it) sees the same knobs.
fn ensure_worktree_config(paths: &IntentPaths, cfg: &crate::io::config::OrchestratorConfig) -> Result<()> {
    if paths.config_path.exists() {
        return Ok(());
    }
    write_config(&paths.config_path, cfg)
}
