//! Test-only helpers: scripted workers, unit builders, and disposable git
//! repositories with isolated worktree/state roots.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{UnitStatus, WorkerReport};
use crate::core::unit::Unit;
use crate::elaborate::{ElaborateOutcome, elaborate};
use crate::io::config::{OrchestratorConfig, write_config};
use crate::io::worker::{Worker, WorkerRequest};

/// Create a deterministic unit with default discipline and criteria.
pub fn unit(id: &str, depends_on: &[&str], status: UnitStatus) -> Unit {
    Unit {
        id: id.to_string(),
        discipline: "general".to_string(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        status,
        criteria: format!("{id} criteria"),
    }
}

/// Disposable git repository with its own worktree and global-state roots.
///
/// Layout inside one tempdir: `repo/` (primary checkout), `worktrees/`
/// (arena root, configured via `.ai-dlc/config.toml`), `global/` (global
/// state scope).
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).context("create repo dir")?;
        fs::create_dir_all(temp.path().join("worktrees")).context("create worktree root")?;

        run_git(&root, &["init"])?;
        run_git(&root, &["config", "user.email", "test@example.com"])?;
        run_git(&root, &["config", "user.name", "test"])?;
        fs::write(root.join("README.md"), "hi\n").context("write README")?;
        run_git(&root, &["add", "README.md"])?;
        run_git(&root, &["commit", "-m", "chore: init"])?;

        let mut cfg = OrchestratorConfig::default();
        cfg.worktree_root = temp.path().join("worktrees");
        write_config(&root.join(".ai-dlc").join("config.toml"), &cfg)?;

        Ok(Self { _temp: temp, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worktree_root(&self) -> PathBuf {
        self._temp.path().join("worktrees")
    }

    pub fn global_state_root(&self) -> PathBuf {
        self._temp.path().join("global")
    }

    /// Rewrite the primary config (e.g. to set `max_iterations`).
    pub fn write_config(&self, cfg: &OrchestratorConfig) -> Result<()> {
        write_config(&self.root().join(".ai-dlc").join("config.toml"), cfg)
    }

    /// Elaborate an intent with a default intent text.
    pub fn elaborate_intent(&self, slug: &str) -> Result<ElaborateOutcome> {
        elaborate(self.root(), slug, &format!("Intent text for {slug}"))
    }

    /// Create and switch to a new branch in the primary checkout (test-only;
    /// product code never switches the primary).
    pub fn switch_new_branch(&self, name: &str) -> Result<()> {
        run_git(self.root(), &["checkout", "-b", name])
    }

    /// Write unit files into a worktree's intent directory and commit them.
    pub fn seed_units(&self, worktree: &Path, slug: &str, units: &[Unit]) -> Result<()> {
        let intent_dir = worktree.join(".ai-dlc").join(slug);
        for u in units {
            crate::io::units::write_unit(&intent_dir, u)?;
        }
        commit_all(worktree, "chore: seed units")
    }
}

/// Stage and commit everything in a checkout (no-op when clean).
pub fn commit_all(workdir: &Path, message: &str) -> Result<()> {
    run_git(workdir, &["add", "-A"])?;
    let staged = Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(workdir)
        .status()
        .context("git diff --cached")?;
    if !staged.success() {
        run_git(workdir, &["commit", "-m", message])?;
    }
    Ok(())
}

fn run_git(workdir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

/// Worker double that replays a fixed sequence of reports.
///
/// When the script is exhausted, `execute` writes nothing so callers observe
/// a missing-report error.
pub struct ScriptedWorker {
    reports: Mutex<VecDeque<WorkerReport>>,
}

impl ScriptedWorker {
    pub fn new(reports: Vec<WorkerReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.reports.lock().expect("scripted worker lock").len()
    }
}

impl Worker for ScriptedWorker {
    fn execute(&self, request: &WorkerRequest) -> Result<()> {
        let Some(report) = self
            .reports
            .lock()
            .expect("scripted worker lock")
            .pop_front()
        else {
            return Ok(());
        };
        if let Some(parent) = request.report_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(&report)?;
        buf.push('\n');
        fs::write(&request.report_path, buf)
            .with_context(|| format!("write {}", request.report_path.display()))?;
        fs::write(&request.log_path, "scripted worker\n")
            .with_context(|| format!("write {}", request.log_path.display()))?;
        Ok(())
    }
}
