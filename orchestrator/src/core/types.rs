//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a construction unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Completed => "completed",
            UnitStatus::Blocked => "blocked",
        }
    }

    /// Parse a status string as written in unit frontmatter or on the CLI.
    pub fn parse(value: &str) -> Option<UnitStatus> {
        match value {
            "pending" => Some(UnitStatus::Pending),
            "in_progress" => Some(UnitStatus::InProgress),
            "completed" => Some(UnitStatus::Completed),
            "blocked" => Some(UnitStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome declared by a worker for one unit-scoped session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerOutcome {
    Completed,
    IssuesFound,
    Blocked,
}

impl WorkerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerOutcome::Completed => "completed",
            WorkerOutcome::IssuesFound => "issuesFound",
            WorkerOutcome::Blocked => "blocked",
        }
    }
}

/// Structured report produced by a worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub outcome: WorkerOutcome,
    pub notes: String,
}

/// Lifecycle status of an intent and its iteration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Active,
    Complete,
}

/// Autonomy mode for one hat of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HatMode {
    HumanInLoop,
    OccasionalHuman,
    Autonomous,
}

/// Fatal configuration problem: cyclic unit graph, duplicate ids, malformed
/// workflow. Never retried.
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_status_parse_round_trips() {
        for status in [
            UnitStatus::Pending,
            UnitStatus::InProgress,
            UnitStatus::Completed,
            UnitStatus::Blocked,
        ] {
            assert_eq!(UnitStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UnitStatus::parse("done"), None);
    }

    #[test]
    fn worker_outcome_serializes_camel_case() {
        let json = serde_json::to_string(&WorkerOutcome::IssuesFound).expect("serialize");
        assert_eq!(json, "\"issuesFound\"");
    }
}
