//! Deterministic naming for intent/unit branches and worktree arenas.
//!
//! Every isolated workspace is keyed by a stable handle: `(intentSlug)` for
//! the intent arena, `(intentSlug, unitSlug)` for unit arenas. The same
//! inputs always produce the same branch name and worktree path, which is
//! what makes `ensure_worktree` idempotent.

use std::path::{Path, PathBuf};

/// Validate an intent slug for use in branch names and worktree paths.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("slug must not be empty".to_string());
    }
    if !slug.chars().next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
        return Err(format!("slug must start with [a-z0-9] (got '{slug}')"));
    }
    if slug
        .chars()
        .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'))
    {
        return Err(format!("slug must be [a-z0-9-] only (got '{slug}')"));
    }
    if slug.ends_with('-') || slug.contains("--") {
        return Err(format!("slug must not contain '--' or end with '-' (got '{slug}')"));
    }
    Ok(())
}

/// Branch holding the intent's integration line: `ai-dlc/{intentSlug}`.
pub fn intent_branch(intent_slug: &str) -> String {
    format!("ai-dlc/{intent_slug}")
}

/// Branch holding one unit's work.
///
/// Logically this is `ai-dlc/{intentSlug}/{unitSlug}`, but git cannot hold a
/// ref at a path that is also a ref-directory prefix (the intent branch
/// already occupies `refs/heads/ai-dlc/{intentSlug}`), so the unit segment is
/// flattened with `--`.
pub fn unit_branch(intent_slug: &str, unit_slug: &str) -> String {
    format!("ai-dlc/{intent_slug}--{unit_slug}")
}

/// Worktree path for the intent arena: `{root}/ai-dlc-{intentSlug}`.
pub fn intent_worktree(worktree_root: &Path, intent_slug: &str) -> PathBuf {
    worktree_root.join(format!("ai-dlc-{intent_slug}"))
}

/// Worktree path for a unit arena: `{root}/ai-dlc-{intentSlug}-{unitSlug}`.
pub fn unit_worktree(worktree_root: &Path, intent_slug: &str, unit_slug: &str) -> PathBuf {
    worktree_root.join(format!("ai-dlc-{intent_slug}-{unit_slug}"))
}
