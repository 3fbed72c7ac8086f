//! Scoped key/value persistence for ephemeral workflow artifacts.
//!
//! Three scopes: `branch` (keyed by the current git branch of the working
//! root, so switching branches changes the visible key set), `repo`, and
//! `global`. Writes are last-write-wins atomic whole-file replaces; callers
//! that cannot tolerate lost updates must read-modify-write defensively.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::git::Git;

/// Visibility scope for a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Keyed by the current repository branch.
    Branch,
    /// Shared across branches of one repository.
    Repo,
    /// Shared across repositories.
    Global,
}

/// Contract for scoped key/value persistence.
///
/// `load` of a missing key returns `Ok(None)`, never an error; callers
/// default rather than fail.
pub trait StateStore {
    fn save(&self, scope: Scope, key: &str, content: &str) -> Result<()>;
    fn load(&self, scope: Scope, key: &str) -> Result<Option<String>>;
    fn delete(&self, scope: Scope, key: &str) -> Result<()>;
    fn list(&self, scope: Scope) -> Result<Vec<String>>;
}

/// Filesystem-backed store rooted at a working directory.
///
/// Layout: repo scope under `.ai-dlc/state/repo/`, branch scope under
/// `.ai-dlc/state/branches/{branch}/` ('/' in branch names encoded as "__"),
/// global scope under an explicit global root.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    work_root: PathBuf,
    global_root: PathBuf,
}

impl FsStateStore {
    pub fn new(work_root: impl Into<PathBuf>, global_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            global_root: global_root.into(),
        }
    }

    fn scope_dir(&self, scope: Scope) -> Result<PathBuf> {
        let state_dir = self.work_root.join(".ai-dlc").join("state");
        Ok(match scope {
            Scope::Repo => state_dir.join("repo"),
            Scope::Branch => {
                let branch = Git::new(&self.work_root).current_branch()?;
                state_dir.join("branches").join(encode_branch(&branch))
            }
            Scope::Global => self.global_root.clone(),
        })
    }

    fn key_path(&self, scope: Scope, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.scope_dir(scope)?.join(key))
    }
}

impl StateStore for FsStateStore {
    #[instrument(skip_all, fields(key))]
    fn save(&self, scope: Scope, key: &str, content: &str) -> Result<()> {
        let path = self.key_path(scope, key)?;
        debug!(path = %path.display(), "saving state key");
        write_atomic(&path, content)
    }

    fn load(&self, scope: Scope, key: &str) -> Result<Option<String>> {
        let path = self.key_path(scope, key)?;
        // One retry on transient I/O errors; a missing key is not an error.
        match read_optional(&path) {
            Ok(found) => Ok(found),
            Err(_) => read_optional(&path)
                .with_context(|| format!("read state key {}", path.display())),
        }
    }

    fn delete(&self, scope: Scope, key: &str) -> Result<()> {
        let path = self.key_path(scope, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("delete state key {}", path.display()))
            }
        }
    }

    fn list(&self, scope: Scope) -> Result<Vec<String>> {
        let dir = self.scope_dir(scope)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list state dir {}", dir.display()));
            }
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read state dir {}", dir.display()))?;
            let name = entry.file_name();
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                && let Some(name) = name.to_str()
            {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Global-scope root: `$HOME/.ai-dlc/state`, falling back to a repo-local
/// directory when `HOME` is unset.
pub fn default_global_root(work_root: &Path) -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".ai-dlc").join("state"))
        .unwrap_or_else(|| work_root.join(".ai-dlc").join("state").join("global"))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state key path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state file {}", path.display()))?;
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow!("state key must not be empty"));
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(anyhow!("state key must be a bare file name (got '{key}')"));
    }
    Ok(())
}

fn encode_branch(branch: &str) -> String {
    branch.replace('/', "__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn load_missing_key_returns_none() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        let loaded = store.load(Scope::Repo, "missing.json").expect("load");
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_load_delete_round_trip() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());

        store
            .save(Scope::Repo, "intent.json", "{\"slug\":\"x\"}")
            .expect("save");
        let loaded = store.load(Scope::Repo, "intent.json").expect("load");
        assert_eq!(loaded.as_deref(), Some("{\"slug\":\"x\"}"));

        store.delete(Scope::Repo, "intent.json").expect("delete");
        assert_eq!(store.load(Scope::Repo, "intent.json").expect("load"), None);
        // Deleting a missing key is not an error.
        store.delete(Scope::Repo, "intent.json").expect("delete");
    }

    #[test]
    fn branch_scope_is_keyed_by_current_branch() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());

        store
            .save(Scope::Branch, "iteration.json", "{}")
            .expect("save");
        assert_eq!(
            store.list(Scope::Branch).expect("list"),
            vec!["iteration.json".to_string()]
        );

        repo.switch_new_branch("other").expect("switch");
        assert!(store.list(Scope::Branch).expect("list").is_empty());
        assert_eq!(
            store.load(Scope::Branch, "iteration.json").expect("load"),
            None
        );
    }

    #[test]
    fn list_is_sorted_and_empty_for_missing_scope_dir() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        assert!(store.list(Scope::Global).expect("list").is_empty());

        store.save(Scope::Global, "b.json", "{}").expect("save");
        store.save(Scope::Global, "a.json", "{}").expect("save");
        assert_eq!(
            store.list(Scope::Global).expect("list"),
            vec!["a.json".to_string(), "b.json".to_string()]
        );
    }

    #[test]
    fn keys_with_separators_are_rejected() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        assert!(store.save(Scope::Repo, "a/b.json", "x").is_err());
        assert!(store.save(Scope::Repo, "..", "x").is_err());
    }
}
