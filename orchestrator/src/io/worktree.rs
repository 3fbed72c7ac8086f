//! Worktree/branch manager: deterministic, idempotent arena creation.
//!
//! Each arena (intent or unit) is keyed by a stable handle and materialized
//! as a git branch plus worktree. Creation never touches the primary working
//! directory; everything goes through `git worktree` against the repository
//! root.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::naming;
use crate::io::git::Git;

/// Failure to materialize one arena. Aborts only the affected unit (recorded
/// as a blocker); other ready units proceed unaffected.
#[derive(Debug, Clone)]
pub struct WorktreeError {
    pub branch: String,
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for WorktreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worktree error for branch '{}' at {}: {}",
            self.branch,
            self.path.display(),
            self.message
        )
    }
}

impl std::error::Error for WorktreeError {}

/// Resolves arena handles to branches and worktree paths, creating them on
/// first use.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_root: PathBuf,
    worktree_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>, worktree_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktree_root: worktree_root.into(),
        }
    }

    /// Resolve (and create if absent) the intent arena.
    pub fn ensure_intent_worktree(&self, intent_slug: &str) -> Result<PathBuf> {
        let branch = naming::intent_branch(intent_slug);
        let path = naming::intent_worktree(&self.worktree_root, intent_slug);
        self.ensure_worktree(&branch, &path, None)?;
        Ok(path)
    }

    /// Resolve (and create if absent) a unit arena, branched from the intent
    /// branch tip.
    pub fn ensure_unit_worktree(&self, intent_slug: &str, unit_slug: &str) -> Result<PathBuf> {
        let intent_branch = naming::intent_branch(intent_slug);
        let branch = naming::unit_branch(intent_slug, unit_slug);
        let path = naming::unit_worktree(&self.worktree_root, intent_slug, unit_slug);
        self.ensure_worktree(&branch, &path, Some(&intent_branch))?;
        Ok(path)
    }

    /// Create `branch` and a worktree at `path` only if absent. Idempotent:
    /// a registered worktree at the same path for the same branch is success.
    #[instrument(skip_all, fields(branch, path = %path.display()))]
    pub fn ensure_worktree(
        &self,
        branch: &str,
        path: &Path,
        start_point: Option<&str>,
    ) -> Result<()> {
        let git = Git::new(&self.repo_root);

        let registered = git
            .worktree_list()
            .map_err(|err| self.error(branch, path, format!("list worktrees: {err:#}")))?;
        if let Some(entry) = registered.iter().find(|e| e.path == path) {
            if entry.branch.as_deref() == Some(branch) {
                debug!("worktree already exists");
                return Ok(());
            }
            return Err(self
                .error(
                    branch,
                    path,
                    format!(
                        "path already bound to branch {:?}",
                        entry.branch.as_deref().unwrap_or("<detached>")
                    ),
                )
                .into());
        }

        if path.exists() {
            return Err(self
                .error(branch, path, "path exists but is not a registered worktree".to_string())
                .into());
        }

        let branch_exists = git
            .branch_exists(branch)
            .map_err(|err| self.error(branch, path, format!("{err:#}")))?;
        let created = if branch_exists {
            git.worktree_add(path, branch)
        } else {
            git.worktree_add_new_branch(path, branch, start_point)
        };
        created.map_err(|err| self.error(branch, path, format!("{err:#}")))?;
        debug!("worktree created");
        Ok(())
    }

    fn error(&self, branch: &str, path: &Path, message: String) -> WorktreeError {
        WorktreeError {
            branch: branch.to_string(),
            path: path.to_path_buf(),
            message,
        }
    }
}
