//! Unit file registry: parse, validate, and atomically rewrite unit files.
//!
//! Each unit lives in its own markdown file `unit-{NN}-{name}.md` under the
//! intent directory, with YAML frontmatter (`status`, `depends_on`,
//! `discipline`) and the completion criteria as body. Status updates rewrite
//! the whole file through a temp-file + rename so concurrent readers never
//! observe a torn write.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, instrument};

use crate::core::dag::{self, DagSummary};
use crate::core::types::{ConfigurationError, UnitStatus};
use crate::core::unit::Unit;

static UNIT_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^unit-\d{2}-[a-z0-9][a-z0-9-]*$").unwrap());

/// Parse all unit files in the intent directory, ascending by unit id.
///
/// Fails with [`ConfigurationError`] when the unit set is malformed
/// (duplicate ids, unknown dependency targets, cyclic graph).
#[instrument(skip_all, fields(intent_dir = %intent_dir.display()))]
pub fn list_units(intent_dir: &Path) -> Result<Vec<Unit>> {
    let mut units = Vec::new();
    let entries = fs::read_dir(intent_dir)
        .with_context(|| format!("read intent dir {}", intent_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read intent dir {}", intent_dir.display()))?;
        let path = entry.path();
        let Some(stem) = unit_stem(&path) else {
            continue;
        };
        let unit = load_unit(&path)
            .with_context(|| format!("load unit {}", path.display()))?;
        if unit.id != stem {
            return Err(anyhow!(
                "unit file {} parsed with mismatched id '{}'",
                path.display(),
                unit.id
            ));
        }
        units.push(unit);
    }
    units.sort_by(|a, b| a.id.cmp(&b.id));

    let errors = dag::validate_graph(&units);
    if !errors.is_empty() {
        return Err(anyhow::Error::new(ConfigurationError::new(format!(
            "invalid unit graph in {}: {}",
            intent_dir.display(),
            errors.join("; ")
        ))));
    }
    debug!(count = units.len(), "units loaded");
    Ok(units)
}

/// Parse one unit file.
pub fn load_unit(path: &Path) -> Result<Unit> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let stem = unit_stem(path)
        .ok_or_else(|| anyhow!("not a unit file name: {}", path.display()))?;
    parse_unit(&stem, &contents)
}

/// Update one unit's status, validating the reference and the status value.
///
/// The file is rewritten wholesale (atomic replace); an invalid status or
/// reference leaves it untouched.
#[instrument(skip_all, fields(unit_ref, new_status = %new_status))]
pub fn update_status(intent_dir: &Path, unit_ref: &str, new_status: UnitStatus) -> Result<()> {
    let path = resolve_unit_ref(intent_dir, unit_ref)?;
    let mut unit = load_unit(&path)?;
    unit.status = new_status;
    write_unit_file(&path, &unit)
}

/// CLI-facing variant of [`update_status`]: validates the raw status string
/// before touching the file.
pub fn update_status_str(intent_dir: &Path, unit_ref: &str, new_status: &str) -> Result<()> {
    let status = UnitStatus::parse(new_status).ok_or_else(|| {
        anyhow!(
            "invalid status '{new_status}' (expected pending|in_progress|completed|blocked)"
        )
    })?;
    update_status(intent_dir, unit_ref, status)
}

/// Load a unit by reference, applying the same containment validation as
/// [`update_status`].
pub fn load_unit_ref(intent_dir: &Path, unit_ref: &str) -> Result<Unit> {
    let path = resolve_unit_ref(intent_dir, unit_ref)?;
    load_unit(&path)
}

/// Write a unit to its canonical file under the intent directory.
pub fn write_unit(intent_dir: &Path, unit: &Unit) -> Result<PathBuf> {
    let path = resolve_unit_ref(intent_dir, &unit.id)?;
    write_unit_file(&path, unit)?;
    Ok(path)
}

/// Units ready to start: `pending` with every dependency `completed`.
pub fn find_ready_units(intent_dir: &Path) -> Result<Vec<Unit>> {
    let units = list_units(intent_dir)?;
    Ok(dag::ready_units(&units).into_iter().cloned().collect())
}

/// Units currently being worked on.
pub fn find_in_progress_units(intent_dir: &Path) -> Result<Vec<Unit>> {
    let units = list_units(intent_dir)?;
    Ok(dag::in_progress_units(&units).into_iter().cloned().collect())
}

/// Scheduling summary for the intent directory.
pub fn summary(intent_dir: &Path) -> Result<DagSummary> {
    let units = list_units(intent_dir)?;
    Ok(dag::summarize(&units))
}

/// Resolve a unit reference (`unit-01-core` or `unit-01-core.md`) to a file
/// inside the intent directory, refusing anything that escapes it.
fn resolve_unit_ref(intent_dir: &Path, unit_ref: &str) -> Result<PathBuf> {
    if unit_ref.contains('/') || unit_ref.contains('\\') {
        return Err(anyhow!("unit ref must not contain path separators: '{unit_ref}'"));
    }
    let stem = unit_ref.strip_suffix(".md").unwrap_or(unit_ref);
    if !UNIT_FILE_RE.is_match(stem) {
        return Err(anyhow!(
            "unit ref '{unit_ref}' does not match unit-NN-name convention"
        ));
    }
    Ok(intent_dir.join(format!("{stem}.md")))
}

fn unit_stem(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    UNIT_FILE_RE.is_match(stem).then(|| stem.to_string())
}

fn parse_unit(id: &str, contents: &str) -> Result<Unit> {
    let (frontmatter, body) = split_frontmatter(contents)
        .ok_or_else(|| anyhow!("unit file must start with '---' frontmatter"))?;

    let mut status = None;
    let mut discipline = None;
    let mut depends_on = None;
    for line in frontmatter.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            return Err(anyhow!("malformed frontmatter line '{trimmed}'"));
        };
        let value = value.trim();
        match key.trim() {
            "status" => {
                let parsed = UnitStatus::parse(unquote(value)).ok_or_else(|| {
                    anyhow::Error::new(ConfigurationError::new(format!(
                        "unknown status '{value}' in unit '{id}'"
                    )))
                })?;
                status = Some(parsed);
            }
            "discipline" => discipline = Some(unquote(value).to_string()),
            "depends_on" => depends_on = Some(parse_dependency_list(value)?),
            _ => {}
        }
    }

    Ok(Unit {
        id: id.to_string(),
        discipline: discipline.unwrap_or_default(),
        depends_on: depends_on.unwrap_or_default(),
        status: status.ok_or_else(|| anyhow!("unit '{id}' is missing 'status'"))?,
        criteria: body.trim().to_string(),
    })
}

/// Parse a flow-style YAML list: `[unit-01-a, unit-02-b]` (or empty `[]`).
fn parse_dependency_list(value: &str) -> Result<Vec<String>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| anyhow!("depends_on must be a [..] list (got '{value}')"))?;
    let mut deps = Vec::new();
    for item in inner.split(',') {
        let item = unquote(item.trim());
        if !item.is_empty() {
            deps.push(item.to_string());
        }
    }
    Ok(deps)
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        return &v[1..v.len() - 1];
    }
    v
}

fn write_unit_file(path: &Path, unit: &Unit) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("unit path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let rendered = render_unit(unit);
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, rendered)
        .with_context(|| format!("write temp unit file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace unit file {}", path.display()))?;
    Ok(())
}

fn render_unit(unit: &Unit) -> String {
    let deps = unit.depends_on.join(", ");
    let mut buf = String::new();
    buf.push_str("---\n");
    buf.push_str(&format!("status: {}\n", unit.status));
    buf.push_str(&format!("discipline: {}\n", unit.discipline));
    buf.push_str(&format!("depends_on: [{deps}]\n"));
    buf.push_str("---\n\n");
    buf.push_str(unit.criteria.trim());
    buf.push('\n');
    buf
}

/// Split a document into (frontmatter, rest). Returns None if it doesn't look
/// like frontmatter.
fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    if !contents.starts_with("---\n") {
        return None;
    }
    let after = &contents[4..];
    let end = after.find("\n---\n")?;
    Some((&after[..end], &after[end + 5..]))
}
