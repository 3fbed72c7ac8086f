//! Canonical `.ai-dlc/` layout and intent scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// All canonical paths for one intent within a working root.
#[derive(Debug, Clone)]
pub struct IntentPaths {
    pub work_root: PathBuf,
    pub dlc_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub intent_dir: PathBuf,
    pub intent_doc_path: PathBuf,
    pub plan_path: PathBuf,
    pub blockers_dir: PathBuf,
}

impl IntentPaths {
    pub fn new(work_root: impl Into<PathBuf>, intent_slug: &str) -> Self {
        let work_root = work_root.into();
        let dlc_dir = work_root.join(".ai-dlc");
        let intent_dir = dlc_dir.join(intent_slug);
        Self {
            work_root: work_root.clone(),
            gitignore_path: dlc_dir.join(".gitignore"),
            config_path: dlc_dir.join("config.toml"),
            state_dir: dlc_dir.join("state"),
            runs_dir: dlc_dir.join("runs"),
            intent_doc_path: intent_dir.join("intent.md"),
            plan_path: intent_dir.join("plan.md"),
            blockers_dir: intent_dir.join("blockers"),
            intent_dir,
            dlc_dir,
        }
    }
}

/// Create `.ai-dlc/` scaffolding for an intent inside `work_root`.
///
/// Idempotent: existing files are left alone, so re-running after a partial
/// elaboration completes the layout without clobbering authored content.
pub fn scaffold_intent(work_root: &Path, intent_slug: &str, intent_text: &str) -> Result<IntentPaths> {
    let paths = IntentPaths::new(work_root, intent_slug);

    create_dir(&paths.dlc_dir)?;
    create_dir(&paths.intent_dir)?;
    create_dir(&paths.blockers_dir)?;

    write_if_missing(&paths.gitignore_path, DLC_GITIGNORE)?;
    write_if_missing(&paths.intent_doc_path, &render_intent_doc(intent_text))?;
    write_if_missing(&paths.plan_path, PLAN_PLACEHOLDER)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn render_intent_doc(intent_text: &str) -> String {
    format!("# Intent\n\n{}\n", intent_text.trim())
}

// state/ and runs/ are per-checkout working data; committing them would drag
// one worktree's bookkeeping into every other checkout of the branch.
const DLC_GITIGNORE: &str = "runs/\nstate/\n";
const PLAN_PLACEHOLDER: &str = "# Plan\n\nWritten by the planner hat.\n";
