//! Prompt pack builder for deterministic worker input.
//!
//! The worker prompt is rendered from one embedded template and then split
//! into marked sections. When the rendered pack exceeds the byte budget,
//! droppable sections are removed (last first) until it fits; required
//! sections are never dropped.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");

/// Everything a worker receives: role, intent, criteria, plan, unit table,
/// and the worktree/branch binding.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub role_instructions: String,
    pub intent: String,
    pub criteria: String,
    pub plan: String,
    pub unit_table: String,
    pub worktree_path: String,
    pub branch: String,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Assembled prompt pack within the byte budget.
#[derive(Debug, Clone)]
pub struct PromptPack {
    sections: Vec<ParsedSection>,
    pub dropped: Vec<String>,
}

impl PromptPack {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for section in &self.sections {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(section.content.trim());
        }
        buf.push('\n');
        buf
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.key.as_str()).collect()
    }
}

/// Builds prompt packs under a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, ctx: &WorkerContext) -> Result<PromptPack> {
        let rendered = render_worker_template(ctx)?;
        let mut sections = parse_sections(&rendered);
        let mut dropped = Vec::new();

        // Drop droppable sections from the back until the pack fits.
        while total_bytes(&sections) > self.budget_bytes {
            let Some(idx) = sections.iter().rposition(|s| !s.required) else {
                break;
            };
            let removed = sections.remove(idx);
            debug!(section = %removed.key, "dropping section over budget");
            dropped.push(removed.key);
        }

        Ok(PromptPack { sections, dropped })
    }
}

fn render_worker_template(ctx: &WorkerContext) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("worker", WORKER_TEMPLATE)
        .context("worker template should be valid")?;
    let template = env.get_template("worker")?;
    let rendered = template.render(context! {
        role_instructions => ctx.role_instructions.trim(),
        intent => ctx.intent.trim(),
        criteria => ctx.criteria.trim(),
        plan => non_empty(&ctx.plan),
        unit_table => non_empty(&ctx.unit_table),
        worktree_path => ctx.worktree_path.as_str(),
        branch => ctx.branch.as_str(),
    })?;
    Ok(rendered)
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let required = caps.get(2).map(|m| m.as_str()) == Some("required");
        let start = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let end = matches
            .get(i + 1)
            .and_then(|m| m.get(0))
            .map(|m| m.start())
            .unwrap_or(rendered.len());
        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }
    sections
}

fn total_bytes(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len() + 2).sum()
}
