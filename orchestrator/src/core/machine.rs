//! Hat/iteration state machine for one intent.
//!
//! States are the hat names of the frozen workflow plus the terminal
//! `complete` status. Transitions are pure: unit completion is applied to an
//! in-memory unit slice and reported back through [`AdvanceEffect`] so the
//! orchestration layer persists exactly what changed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::dag;
use crate::core::types::{IntentStatus, UnitStatus};
use crate::core::unit::Unit;

/// Persisted iteration bookkeeping for one intent
/// (state store key `iteration.json`, branch scope).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    /// Session-reset counter (1-indexed, monotonically non-decreasing).
    pub iteration: u32,
    /// Name of the active hat. Must be a member of `workflow`.
    pub hat: String,
    pub status: IntentStatus,
    /// Ordered hat names, frozen at elaboration.
    pub workflow: Vec<String>,
    /// Unit currently bound to the loop, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit: Option<String>,
    /// Iteration safety valve; `None` disables the cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Two-phase deferred-increment flag (set by the stop hook, consumed by
    /// the next start hook).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_advance: Option<bool>,
}

impl IterationState {
    /// Fresh state at the first hat of `workflow`.
    pub fn new(workflow: Vec<String>, max_iterations: Option<u32>) -> Result<Self, String> {
        let first = workflow
            .first()
            .cloned()
            .ok_or_else(|| "workflow must contain at least one hat".to_string())?;
        Ok(Self {
            iteration: 1,
            hat: first,
            status: IntentStatus::Active,
            workflow,
            current_unit: None,
            max_iterations,
            needs_advance: None,
        })
    }

    /// True when the iteration cap is configured and has been reached.
    pub fn cap_reached(&self) -> bool {
        self.max_iterations
            .is_some_and(|max| self.iteration >= max)
    }

    fn hat_index(&self) -> Result<usize, String> {
        self.workflow
            .iter()
            .position(|h| h == &self.hat)
            .ok_or_else(|| format!("active hat '{}' is not in the workflow", self.hat))
    }
}

/// What `advance` did, so callers can persist unit status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceEffect {
    /// Moved to the next hat; same iteration, same unit.
    NextHat { hat: String },
    /// Finished the workflow for `unit`; restarted at the first hat bound to
    /// `next_unit`.
    UnitCompleted {
        unit: String,
        next_unit: Option<String>,
    },
    /// Terminal: nothing left to schedule; `finished_unit` (if any) was
    /// completed by this call.
    Complete { finished_unit: Option<String> },
    /// Completed the current unit but only blocked units remain. The next
    /// pass reports the deadlock; this call does not.
    Stalled { finished_unit: Option<String> },
}

/// Advance the state machine by one hat.
///
/// `units` is the intent's unit set (`None` when no DAG is in use). Unit
/// completion is applied in place; the caller persists it via the registry.
pub fn advance(state: &mut IterationState, units: Option<&mut [Unit]>) -> Result<AdvanceEffect, String> {
    let idx = state.hat_index()?;
    if idx + 1 < state.workflow.len() {
        state.hat = state.workflow[idx + 1].clone();
        return Ok(AdvanceEffect::NextHat {
            hat: state.hat.clone(),
        });
    }

    // Last hat: the workflow finished for the current unit (if any).
    let Some(units) = units else {
        state.status = IntentStatus::Complete;
        state.current_unit = None;
        return Ok(AdvanceEffect::Complete {
            finished_unit: None,
        });
    };

    let finished = state.current_unit.take();
    if let Some(id) = &finished {
        let unit = units
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| format!("current unit '{}' not found", id))?;
        unit.status = UnitStatus::Completed;
    }

    let next = {
        let ready = dag::ready_units(units);
        let in_progress = dag::in_progress_units(units);
        ready
            .first()
            .or_else(|| in_progress.first())
            .map(|u| u.id.clone())
    };

    if let Some(next_unit) = next {
        state.hat = state.workflow[0].clone();
        state.current_unit = Some(next_unit.clone());
        return Ok(match finished {
            Some(unit) => AdvanceEffect::UnitCompleted {
                unit,
                next_unit: Some(next_unit),
            },
            None => AdvanceEffect::NextHat {
                hat: state.hat.clone(),
            },
        });
    }

    if dag::summarize(units).all_complete {
        state.status = IntentStatus::Complete;
        return Ok(AdvanceEffect::Complete {
            finished_unit: finished,
        });
    }

    // Only blocked (or unreachable pending) units remain.
    Ok(AdvanceEffect::Stalled {
        finished_unit: finished,
    })
}

/// `fail()` called while the first hat was active: there is no previous hat
/// to retreat to. This is an invariant violation, never clamped.
#[derive(Debug, Clone)]
pub struct HatUnderflowError {
    pub hat: String,
}

impl fmt::Display for HatUnderflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fail() at the first hat '{}' (no previous hat to retreat to)",
            self.hat
        )
    }
}

impl std::error::Error for HatUnderflowError {}

/// Retreat to the previous hat after an `issuesFound` outcome.
pub fn fail(state: &mut IterationState) -> Result<(), HatUnderflowError> {
    let idx = state
        .workflow
        .iter()
        .position(|h| h == &state.hat)
        .ok_or_else(|| HatUnderflowError {
            hat: state.hat.clone(),
        })?;
    if idx == 0 {
        return Err(HatUnderflowError {
            hat: state.hat.clone(),
        });
    }
    state.hat = state.workflow[idx - 1].clone();
    Ok(())
}

/// Record that the next session must increment the iteration counter.
pub fn defer_iteration_increment(state: &mut IterationState) {
    state.needs_advance = Some(true);
}

/// Consume a deferred increment, if one is pending. Returns true when the
/// counter moved. Consuming clears the flag so re-running the start hook
/// cannot double-increment.
pub fn consume_deferred_increment(state: &mut IterationState) -> bool {
    if state.needs_advance == Some(true) {
        state.iteration += 1;
        state.needs_advance = None;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unit;

    fn workflow() -> Vec<String> {
        ["elaborator", "planner", "builder", "reviewer"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn advance_reaches_complete_after_workflow_length_calls() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        let mut units = vec![unit("unit-01-only", &[], UnitStatus::InProgress)];
        state.current_unit = Some("unit-01-only".to_string());

        for _ in 0..workflow().len() - 1 {
            let effect = advance(&mut state, Some(units.as_mut_slice())).expect("advance");
            assert!(matches!(effect, AdvanceEffect::NextHat { .. }));
            assert_eq!(state.status, IntentStatus::Active);
        }

        let effect = advance(&mut state, Some(units.as_mut_slice())).expect("advance");
        assert_eq!(
            effect,
            AdvanceEffect::Complete {
                finished_unit: Some("unit-01-only".to_string())
            }
        );
        assert_eq!(state.status, IntentStatus::Complete);
        assert_eq!(units[0].status, UnitStatus::Completed);
    }

    #[test]
    fn fail_then_advance_round_trips() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        state.hat = "reviewer".to_string();
        let iteration = state.iteration;

        fail(&mut state).expect("fail");
        assert_eq!(state.hat, "builder");
        let effect = advance(&mut state, None).expect("advance");
        assert_eq!(
            effect,
            AdvanceEffect::NextHat {
                hat: "reviewer".to_string()
            }
        );
        assert_eq!(state.iteration, iteration);
    }

    #[test]
    fn fail_at_first_hat_is_an_invariant_violation() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        let err = fail(&mut state).expect_err("must not clamp");
        assert_eq!(err.hat, "elaborator");
    }

    #[test]
    fn last_hat_completion_selects_next_ready_unit() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        state.hat = "reviewer".to_string();
        state.current_unit = Some("unit-01-a".to_string());
        let mut units = vec![
            unit("unit-01-a", &[], UnitStatus::InProgress),
            unit("unit-02-b", &["unit-01-a"], UnitStatus::Pending),
        ];

        let effect = advance(&mut state, Some(units.as_mut_slice())).expect("advance");
        assert_eq!(
            effect,
            AdvanceEffect::UnitCompleted {
                unit: "unit-01-a".to_string(),
                next_unit: Some("unit-02-b".to_string()),
            }
        );
        assert_eq!(state.hat, "elaborator");
        assert_eq!(state.current_unit, Some("unit-02-b".to_string()));
        assert_eq!(state.status, IntentStatus::Active);
    }

    #[test]
    fn last_hat_with_blocked_unit_stalls_instead_of_completing() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        state.hat = "reviewer".to_string();
        state.current_unit = Some("unit-01-a".to_string());
        let mut units = vec![
            unit("unit-01-a", &[], UnitStatus::InProgress),
            unit("unit-02-b", &[], UnitStatus::Blocked),
        ];

        let effect = advance(&mut state, Some(units.as_mut_slice())).expect("advance");
        assert_eq!(
            effect,
            AdvanceEffect::Stalled {
                finished_unit: Some("unit-01-a".to_string())
            }
        );
        assert_eq!(state.status, IntentStatus::Active);
        assert_eq!(state.current_unit, None);
    }

    #[test]
    fn deferred_increment_is_consumed_exactly_once() {
        let mut state = IterationState::new(workflow(), None).expect("state");
        assert!(!consume_deferred_increment(&mut state));
        assert_eq!(state.iteration, 1);

        defer_iteration_increment(&mut state);
        assert!(consume_deferred_increment(&mut state));
        assert_eq!(state.iteration, 2);
        assert!(!consume_deferred_increment(&mut state));
        assert_eq!(state.iteration, 2);
    }

    #[test]
    fn cap_reached_respects_max_iterations() {
        let mut state = IterationState::new(workflow(), Some(3)).expect("state");
        assert!(!state.cap_reached());
        state.iteration = 3;
        assert!(state.cap_reached());
    }

    #[test]
    fn iteration_state_serializes_camel_case() {
        let state = IterationState {
            iteration: 2,
            hat: "builder".to_string(),
            status: IntentStatus::Active,
            workflow: vec!["builder".to_string()],
            current_unit: Some("unit-01-a".to_string()),
            max_iterations: Some(5),
            needs_advance: Some(true),
        };
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["currentUnit"], "unit-01-a");
        assert_eq!(json["maxIterations"], 5);
        assert_eq!(json["needsAdvance"], true);
        assert_eq!(json["status"], "active");
    }
}
