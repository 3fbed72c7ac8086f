//! Human-readable status rendering.
//!
//! Every terminal or exceptional condition surfaces as readable status text
//! (iteration, hat, ready/in-progress counts) rather than a raw error; the
//! same rendering feeds the session-start context injection and the `status`
//! CLI command.

use crate::core::dag;
use crate::core::machine::IterationState;
use crate::core::types::IntentStatus;
use crate::core::unit::Unit;
use crate::io::intent::IntentRecord;

/// Render the full status block for an intent.
pub fn render_status(record: &IntentRecord, state: &IterationState, units: &[Unit]) -> String {
    let summary = dag::summarize(units);
    let mut buf = String::new();
    buf.push_str(&format!("intent: {} ({})\n", record.slug, record.branch));
    buf.push_str(&format!(
        "status: {}\n",
        match state.status {
            IntentStatus::Active => "active",
            IntentStatus::Complete => "complete",
        }
    ));
    buf.push_str(&format!("iteration: {}", state.iteration));
    if let Some(max) = state.max_iterations {
        buf.push_str(&format!(" / {max}"));
    }
    buf.push('\n');
    buf.push_str(&format!(
        "hat: {} (workflow: {})\n",
        state.hat,
        state.workflow.join(" -> ")
    ));
    if let Some(unit) = &state.current_unit {
        buf.push_str(&format!("current unit: {unit}\n"));
    }
    buf.push_str(&format!(
        "units: {} ready, {} in progress, all complete: {}\n",
        summary.ready_count, summary.in_progress_count, summary.all_complete
    ));
    if !units.is_empty() {
        buf.push('\n');
        buf.push_str(&render_unit_table(units));
    }
    buf
}

/// Render the unit table fed to workers and shown in `status`.
pub fn render_unit_table(units: &[Unit]) -> String {
    let mut buf = String::new();
    buf.push_str("| unit | discipline | status | depends on |\n");
    buf.push_str("|---|---|---|---|\n");
    for unit in units {
        let deps = if unit.depends_on.is_empty() {
            "-".to_string()
        } else {
            unit.depends_on.join(", ")
        };
        buf.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            unit.id, unit.discipline, unit.status, deps
        ));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UnitStatus;
    use crate::test_support::unit;

    #[test]
    fn status_includes_iteration_hat_and_counts() {
        let record = IntentRecord {
            slug: "x".to_string(),
            branch: "ai-dlc/x".to_string(),
            status: IntentStatus::Active,
        };
        let mut state =
            IterationState::new(vec!["builder".to_string(), "reviewer".to_string()], Some(5))
                .expect("state");
        state.iteration = 2;
        state.current_unit = Some("unit-01-a".to_string());
        let units = vec![
            unit("unit-01-a", &[], UnitStatus::InProgress),
            unit("unit-02-b", &["unit-01-a"], UnitStatus::Pending),
        ];

        let rendered = render_status(&record, &state, &units);
        assert!(rendered.contains("iteration: 2 / 5"));
        assert!(rendered.contains("hat: builder"));
        assert!(rendered.contains("0 ready, 1 in progress"));
        assert!(rendered.contains("current unit: unit-01-a"));
        assert!(rendered.contains("| unit-02-b | general | pending | unit-01-a |"));
    }
}
