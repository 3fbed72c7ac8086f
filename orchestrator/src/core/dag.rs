//! Deterministic DAG logic over construction units.
//!
//! All functions here operate on in-memory unit slices; parsing and persistence
//! live in [`crate::io::units`]. Output ordering is ascending by unit id so
//! scheduling stays reproducible across runs.

use std::collections::{HashMap, HashSet};

use crate::core::types::UnitStatus;
use crate::core::unit::Unit;

/// Scheduling summary over one intent's unit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DagSummary {
    pub ready_count: usize,
    pub in_progress_count: usize,
    /// True iff no unit is `pending`, `in_progress`, or `blocked`.
    pub all_complete: bool,
}

impl DagSummary {
    /// Zero ready, zero in progress, work remaining: nothing can be scheduled.
    pub fn is_deadlocked(&self) -> bool {
        self.ready_count == 0 && self.in_progress_count == 0 && !self.all_complete
    }
}

/// Check graph invariants: unique ids, known dependency targets, acyclic.
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_graph(units: &[Unit]) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for unit in units {
        if !seen.insert(unit.id.as_str()) {
            errors.push(format!("duplicate unit id '{}'", unit.id));
        }
    }

    let ids: HashSet<&str> = units.iter().map(|u| u.id.as_str()).collect();
    for unit in units {
        for dep in &unit.depends_on {
            if dep == &unit.id {
                errors.push(format!("unit '{}' depends on itself", unit.id));
            } else if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "unit '{}' depends on unknown unit '{}'",
                    unit.id, dep
                ));
            }
        }
    }

    if errors.is_empty()
        && let Some(cycle) = find_cycle(units)
    {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

/// Units with status `pending` whose every dependency is `completed`,
/// ascending by unit id.
pub fn ready_units<'a>(units: &'a [Unit]) -> Vec<&'a Unit> {
    let status_by_id: HashMap<&str, UnitStatus> =
        units.iter().map(|u| (u.id.as_str(), u.status)).collect();

    let mut ready: Vec<&Unit> = units
        .iter()
        .filter(|u| u.status == UnitStatus::Pending)
        .filter(|u| {
            u.depends_on
                .iter()
                .all(|dep| status_by_id.get(dep.as_str()) == Some(&UnitStatus::Completed))
        })
        .collect();
    ready.sort_by(|a, b| a.id.cmp(&b.id));
    ready
}

/// Units with status `in_progress`, ascending by unit id.
pub fn in_progress_units<'a>(units: &'a [Unit]) -> Vec<&'a Unit> {
    let mut found: Vec<&Unit> = units
        .iter()
        .filter(|u| u.status == UnitStatus::InProgress)
        .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
}

/// Compute the scheduling summary for a unit set.
pub fn summarize(units: &[Unit]) -> DagSummary {
    DagSummary {
        ready_count: ready_units(units).len(),
        in_progress_count: in_progress_units(units).len(),
        all_complete: units.iter().all(|u| u.status == UnitStatus::Completed),
    }
}

/// Find one dependency cycle, if any, as a path of unit ids ending where it
/// started. Traversal order is deterministic (ascending id).
fn find_cycle(units: &[Unit]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    let deps_by_id: HashMap<&str, &[String]> = units
        .iter()
        .map(|u| (u.id.as_str(), u.depends_on.as_slice()))
        .collect();

    let mut marks: HashMap<&str, Mark> = units
        .iter()
        .map(|u| (u.id.as_str(), Mark::Unvisited))
        .collect();

    fn visit<'a>(
        id: &'a str,
        deps_by_id: &HashMap<&'a str, &'a [String]>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::InStack) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            _ => {}
        }

        marks.insert(id, Mark::InStack);
        stack.push(id);
        if let Some(deps) = deps_by_id.get(id) {
            let mut sorted: Vec<&String> = deps.iter().collect();
            sorted.sort();
            for dep in sorted {
                if deps_by_id.contains_key(dep.as_str())
                    && let Some(cycle) = visit(dep, deps_by_id, marks, stack)
                {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut order: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
    order.sort_unstable();
    let mut stack = Vec::new();
    for id in order {
        if marks.get(id) == Some(&Mark::Unvisited)
            && let Some(cycle) = visit(id, &deps_by_id, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}
