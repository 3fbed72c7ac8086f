//! Blocker artifacts: documented obstacles awaiting human or future-session
//! action.
//!
//! Blockers are purely advisory free text; scheduling never reads them. One
//! file per unit (plus one for intent-level obstacles) under the intent's
//! `blockers/` directory, appended to on repeat occurrences.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::layout::IntentPaths;

/// Record a blocker for one unit. Returns the blocker file path.
pub fn write_unit_blocker(
    paths: &IntentPaths,
    unit_id: &str,
    hat: &str,
    notes: &str,
) -> Result<PathBuf> {
    let path = paths.blockers_dir.join(format!("{unit_id}.md"));
    append_entry(&path, &format!("unit {unit_id}"), hat, notes)?;
    Ok(path)
}

/// Record an intent-level blocker (e.g. deadlock diagnosis).
pub fn write_intent_blocker(paths: &IntentPaths, hat: &str, notes: &str) -> Result<PathBuf> {
    let path = paths.blockers_dir.join("intent.md");
    append_entry(&path, "intent", hat, notes)?;
    Ok(path)
}

/// Blocker files currently recorded, ascending by file name.
pub fn list_blockers(paths: &IntentPaths) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(&paths.blockers_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("read blockers dir {}", paths.blockers_dir.display()));
        }
    };
    for entry in entries {
        let entry = entry
            .with_context(|| format!("read blockers dir {}", paths.blockers_dir.display()))?;
        if entry.path().extension().and_then(|e| e.to_str()) == Some("md") {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn append_entry(path: &Path, scope: &str, hat: &str, notes: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create blockers dir {}", parent.display()))?;
    }
    let mut contents = if path.exists() {
        let mut existing =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        existing.push_str("\n---\n\n");
        existing
    } else {
        format!("# Blocker: {scope}\n\n")
    };
    contents.push_str(&format!("## Reported by hat `{hat}`\n\n"));
    let notes = notes.trim();
    if notes.is_empty() {
        contents.push_str("(no notes supplied)\n");
    } else {
        contents.push_str(notes);
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "blocker recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::layout::scaffold_intent;

    #[test]
    fn unit_blocker_is_written_and_listed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = scaffold_intent(temp.path(), "x", "intent").expect("scaffold");

        let blocker =
            write_unit_blocker(&paths, "unit-01-core", "builder", "tried A and B; suspect C")
                .expect("write blocker");
        assert!(blocker.is_file());
        let contents = fs::read_to_string(&blocker).expect("read");
        assert!(contents.contains("unit unit-01-core"));
        assert!(contents.contains("suspect C"));

        let listed = list_blockers(&paths).expect("list");
        assert_eq!(listed, vec![blocker]);
    }

    #[test]
    fn repeat_blockers_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = scaffold_intent(temp.path(), "x", "intent").expect("scaffold");

        write_unit_blocker(&paths, "unit-01-core", "builder", "first").expect("write");
        let path =
            write_unit_blocker(&paths, "unit-01-core", "reviewer", "second").expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
        assert!(contents.contains("---"));
    }
}
