//! Orchestrator configuration stored under `.ai-dlc/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::naming::validate_slug;
use crate::core::types::{ConfigurationError, HatMode};

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values. The workflow is
/// customizable only before an intent is created; elaboration freezes the hat
/// names into the iteration state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Iteration safety valve; 0 disables the cap.
    pub max_iterations: u32,

    /// Base directory for worktree arenas.
    pub worktree_root: PathBuf,

    /// Total per-worker wall-clock budget in seconds.
    pub worker_timeout_secs: u64,

    /// Truncate worker stdout/stderr logs beyond this many bytes.
    pub worker_output_limit_bytes: usize,

    /// Maximum bytes for the prompt pack before dropping droppable sections.
    pub prompt_budget_bytes: usize,

    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub hats: Vec<HatSpec>,
}

/// One hat of the workflow: a named role plus its autonomy mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HatSpec {
    pub name: String,
    pub mode: HatMode,
    /// Role instruction text; empty means use the built-in default for this
    /// hat name.
    #[serde(default)]
    pub instructions: String,
}

const DEFAULT_ELABORATOR: &str = include_str!("hats/elaborator.md");
const DEFAULT_PLANNER: &str = include_str!("hats/planner.md");
const DEFAULT_BUILDER: &str = include_str!("hats/builder.md");
const DEFAULT_REVIEWER: &str = include_str!("hats/reviewer.md");
const DEFAULT_GENERIC: &str = include_str!("hats/generic.md");

impl HatSpec {
    /// Instruction text for this hat, falling back to built-in defaults.
    pub fn instructions_text(&self) -> &str {
        if !self.instructions.trim().is_empty() {
            return &self.instructions;
        }
        match self.name.as_str() {
            "elaborator" => DEFAULT_ELABORATOR,
            "planner" => DEFAULT_PLANNER,
            "builder" => DEFAULT_BUILDER,
            "reviewer" => DEFAULT_REVIEWER,
            _ => DEFAULT_GENERIC,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            hats: vec![
                HatSpec {
                    name: "elaborator".to_string(),
                    mode: HatMode::HumanInLoop,
                    instructions: String::new(),
                },
                HatSpec {
                    name: "planner".to_string(),
                    mode: HatMode::OccasionalHuman,
                    instructions: String::new(),
                },
                HatSpec {
                    name: "builder".to_string(),
                    mode: HatMode::Autonomous,
                    instructions: String::new(),
                },
                HatSpec {
                    name: "reviewer".to_string(),
                    mode: HatMode::Autonomous,
                    instructions: String::new(),
                },
            ],
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            worktree_root: PathBuf::from("/tmp"),
            worker_timeout_secs: 30 * 60,
            worker_output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
            workflow: WorkflowConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout_secs == 0 {
            return Err(config_error("worker_timeout_secs must be > 0"));
        }
        if self.worker_output_limit_bytes == 0 {
            return Err(config_error("worker_output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(config_error("prompt_budget_bytes must be > 0"));
        }
        if self.workflow.hats.is_empty() {
            return Err(config_error("workflow.hats must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for hat in &self.workflow.hats {
            validate_slug(&hat.name)
                .map_err(|err| config_error(&format!("hat name '{}': {err}", hat.name)))?;
            if !seen.insert(hat.name.as_str()) {
                return Err(config_error(&format!("duplicate hat name '{}'", hat.name)));
            }
        }
        Ok(())
    }

    /// Hat names in workflow order (what elaboration freezes).
    pub fn hat_names(&self) -> Vec<String> {
        self.workflow.hats.iter().map(|h| h.name.clone()).collect()
    }

    /// Look up a hat spec by name.
    pub fn hat(&self, name: &str) -> Option<&HatSpec> {
        self.workflow.hats.iter().find(|h| h.name == name)
    }

    /// Role instruction text for `name`, falling back to the generic built-in
    /// when the hat is not declared (frozen workflows can outlive config
    /// edits).
    pub fn hat_instructions(&self, name: &str) -> &str {
        self.hat(name)
            .map(HatSpec::instructions_text)
            .unwrap_or(DEFAULT_GENERIC)
    }

    /// Cap as an option (`0` in the file means disabled).
    pub fn max_iterations_opt(&self) -> Option<u32> {
        (self.max_iterations > 0).then_some(self.max_iterations)
    }
}

fn config_error(message: &str) -> anyhow::Error {
    anyhow::Error::new(ConfigurationError::new(message))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = OrchestratorConfig::default();
        cfg.max_iterations = 3;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.max_iterations_opt(), Some(3));
    }

    #[test]
    fn duplicate_hat_names_fail_validation() {
        let mut cfg = OrchestratorConfig::default();
        cfg.workflow.hats[1].name = "elaborator".to_string();
        let err = cfg.validate().expect_err("duplicate hats");
        assert!(
            err.downcast_ref::<ConfigurationError>()
                .expect("typed error")
                .message
                .contains("duplicate hat name")
        );
    }

    #[test]
    fn empty_workflow_fails_validation() {
        let mut cfg = OrchestratorConfig::default();
        cfg.workflow.hats.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_hats_resolve_builtin_instructions() {
        let cfg = OrchestratorConfig::default();
        for hat in &cfg.workflow.hats {
            assert!(!hat.instructions_text().trim().is_empty());
        }
        let custom = HatSpec {
            name: "security".to_string(),
            mode: HatMode::Autonomous,
            instructions: String::new(),
        };
        assert!(!custom.instructions_text().trim().is_empty());
    }
}
