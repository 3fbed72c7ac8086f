//! Pass artifact logging under `.ai-dlc/runs/`.
//!
//! Every construction pass leaves a durable artifact directory regardless of
//! `RUST_LOG`: meta, prompt, worker report and worker log. Pass directories
//! are numbered sequentially per intent so ordering survives hat retreats
//! within one iteration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{WorkerOutcome, WorkerReport};

#[derive(Debug, Clone, Serialize)]
pub struct PassMeta {
    pub slug: String,
    pub iteration: u32,
    /// Hat that was active when the worker ran.
    pub hat: String,
    pub unit: String,
    pub outcome: WorkerOutcome,
    pub duration_ms: u64,
}

/// Paths for one pass artifact directory.
#[derive(Debug, Clone)]
pub struct PassPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub report_path: PathBuf,
    pub worker_log_path: PathBuf,
}

impl PassPaths {
    fn new(dir: PathBuf) -> Self {
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            report_path: dir.join("report.json"),
            worker_log_path: dir.join("worker.log"),
            dir,
        }
    }
}

/// Allocate the next pass directory for an intent: `runs/{slug}/pass-NNNN/`.
pub fn next_pass_dir(runs_dir: &Path, slug: &str) -> Result<PassPaths> {
    let intent_runs = runs_dir.join(slug);
    fs::create_dir_all(&intent_runs)
        .with_context(|| format!("create runs dir {}", intent_runs.display()))?;

    let mut max_seen = 0u32;
    for entry in fs::read_dir(&intent_runs)
        .with_context(|| format!("read runs dir {}", intent_runs.display()))?
    {
        let entry = entry.with_context(|| format!("read runs dir {}", intent_runs.display()))?;
        let name = entry.file_name();
        if let Some(name) = name.to_str()
            && let Some(num) = name.strip_prefix("pass-")
            && let Ok(num) = num.parse::<u32>()
        {
            max_seen = max_seen.max(num);
        }
    }

    let dir = intent_runs.join(format!("pass-{:04}", max_seen + 1));
    fs::create_dir_all(&dir).with_context(|| format!("create pass dir {}", dir.display()))?;
    Ok(PassPaths::new(dir))
}

/// Write the pass artifacts. The worker has already written `report.json` and
/// `worker.log` into the same directory; this records the rest.
pub fn write_pass(paths: &PassPaths, meta: &PassMeta, prompt: &str, report: &WorkerReport) -> Result<()> {
    write_json(&paths.meta_path, meta)?;
    write_text(&paths.prompt_path, prompt)?;
    if !paths.report_path.exists() {
        write_json(&paths.report_path, report)?;
    }
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_dirs_are_sequential() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runs = temp.path().join("runs");

        let first = next_pass_dir(&runs, "x").expect("first");
        let second = next_pass_dir(&runs, "x").expect("second");
        assert!(first.dir.ends_with("runs/x/pass-0001"));
        assert!(second.dir.ends_with("runs/x/pass-0002"));
    }

    #[test]
    fn write_pass_records_meta_prompt_and_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runs = temp.path().join("runs");
        let paths = next_pass_dir(&runs, "x").expect("paths");

        let meta = PassMeta {
            slug: "x".to_string(),
            iteration: 1,
            hat: "builder".to_string(),
            unit: "unit-01-core".to_string(),
            outcome: WorkerOutcome::Completed,
            duration_ms: 12,
        };
        let report = WorkerReport {
            outcome: WorkerOutcome::Completed,
            notes: "done".to_string(),
        };
        write_pass(&paths, &meta, "the prompt", &report).expect("write pass");

        assert!(paths.meta_path.is_file());
        assert!(paths.prompt_path.is_file());
        assert!(paths.report_path.is_file());
        let meta_json = fs::read_to_string(&paths.meta_path).expect("read meta");
        assert!(meta_json.contains("\"builder\""));
    }
}
