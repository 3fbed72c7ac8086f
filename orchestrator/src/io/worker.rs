//! Worker abstraction for unit-scoped agent invocation.
//!
//! The [`Worker`] trait decouples pass orchestration from the actual agent
//! backend (currently `codex exec`). Tests use scripted workers that return
//! predetermined reports without spawning processes. The report JSON is
//! validated against an embedded schema before it is trusted.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::WorkerReport;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const REPORT_SCHEMA: &str = include_str!("../../schemas/worker_report.schema.json");

/// Parameters for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Working directory for the worker process (the unit's worktree).
    pub workdir: PathBuf,
    /// Rendered prompt pack to feed to the agent.
    pub prompt: String,
    /// Path where the worker must write its report JSON.
    pub report_path: PathBuf,
    /// Path to write worker stdout/stderr log.
    pub log_path: PathBuf,
    /// Maximum time to wait for the worker to complete.
    pub timeout: Duration,
    /// Truncate worker output logs beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over agent execution backends.
///
/// Implementations must run unattended: no synchronous human input. Ambiguity
/// resolves to a documented assumption or a `blocked` report.
pub trait Worker {
    /// Run the agent. Must write the report to `request.report_path`.
    fn execute(&self, request: &WorkerRequest) -> Result<()>;
}

/// Worker that spawns `codex exec`.
pub struct CodexWorker;

impl Worker for CodexWorker {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &WorkerRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), "starting codex exec");

        if let Some(parent) = request.report_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        let schema_path = request.report_path.with_file_name("report.schema.json");
        fs::write(&schema_path, REPORT_SCHEMA)
            .with_context(|| format!("write report schema {}", schema_path.display()))?;

        let mut cmd = Command::new("codex");
        cmd.arg("exec")
            .arg("-c")
            .arg("model_reasoning_effort=medium")
            .arg("--sandbox")
            .arg("danger-full-access")
            // The unit worktree is a real checkout, but workers may also run
            // in scratch directories during rescue attempts.
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&request.report_path)
            .arg("-")
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run codex exec")?;

        write_worker_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "codex exec timed out"
            );
            return Err(anyhow!("codex exec timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "codex exec failed");
            return Err(anyhow!(
                "codex exec failed with status {:?}",
                output.status.code()
            ));
        }

        debug!("codex exec completed successfully");
        Ok(())
    }
}

/// Execute the worker and load its validated report.
#[instrument(skip_all, fields(report_path = %request.report_path.display()))]
pub fn execute_and_load<W: Worker + ?Sized>(
    worker: &W,
    request: &WorkerRequest,
) -> Result<WorkerReport> {
    worker.execute(request)?;
    let report = read_report(&request.report_path)?;
    debug!(outcome = ?report.outcome, "parsed worker report");
    Ok(report)
}

fn read_report(path: &Path) -> Result<WorkerReport> {
    if !path.exists() {
        return Err(anyhow!("missing worker report {}", path.display()));
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read worker report {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate_report_schema(&value)
        .with_context(|| format!("validate worker report {}", path.display()))?;
    let report: WorkerReport =
        serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))?;
    Ok(report)
}

/// Validate a report instance against the embedded schema (Draft 2020-12).
fn validate_report_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(REPORT_SCHEMA).context("parse report schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile report schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!("report schema violation: {}", messages.join("; ")));
    }
    Ok(())
}

fn write_worker_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create worker log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("worker"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("worker"));
    if output.timed_out {
        buf.push_str("\n[worker timed out]\n");
    }

    if buf.len() > output_limit {
        let truncated = format!(
            "{}\n[truncated {} bytes]\n",
            &buf[..output_limit],
            buf.len() - output_limit
        );
        fs::write(path, truncated)
            .with_context(|| format!("write worker log {}", path.display()))?;
        return Ok(());
    }

    fs::write(path, buf).with_context(|| format!("write worker log {}", path.display()))
}
