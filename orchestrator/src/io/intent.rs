//! Intent record and iteration-state persistence through the scoped store.
//!
//! The intent record lives at repo scope (`intent.json`) so any checkout of
//! the repository can resolve the active intent. The iteration state lives at
//! branch scope (`iteration.json`), which binds it to the intent branch: the
//! orchestrator only sees it from inside the intent worktree.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::machine::IterationState;
use crate::core::types::IntentStatus;
use crate::io::store::{Scope, StateStore};

pub const INTENT_KEY: &str = "intent.json";
pub const ITERATION_STATE_KEY: &str = "iteration.json";

/// One top-level unit of work, tracked on a dedicated branch/worktree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentRecord {
    pub slug: String,
    pub branch: String,
    pub status: IntentStatus,
}

/// Load the active intent record, if one exists.
pub fn load_intent<S: StateStore + ?Sized>(store: &S) -> Result<Option<IntentRecord>> {
    let Some(contents) = store.load(Scope::Repo, INTENT_KEY)? else {
        return Ok(None);
    };
    let record: IntentRecord =
        serde_json::from_str(&contents).context("parse intent record")?;
    Ok(Some(record))
}

/// Persist the intent record at repo scope.
pub fn write_intent<S: StateStore + ?Sized>(store: &S, record: &IntentRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize intent record")?;
    buf.push('\n');
    store.save(Scope::Repo, INTENT_KEY, &buf)
}

/// Load the iteration state from branch scope, if present.
pub fn load_iteration_state<S: StateStore + ?Sized>(store: &S) -> Result<Option<IterationState>> {
    let Some(contents) = store.load(Scope::Branch, ITERATION_STATE_KEY)? else {
        return Ok(None);
    };
    let state: IterationState =
        serde_json::from_str(&contents).context("parse iteration state")?;
    Ok(Some(state))
}

/// Persist the iteration state at branch scope.
pub fn write_iteration_state<S: StateStore + ?Sized>(
    store: &S,
    state: &IterationState,
) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state).context("serialize iteration state")?;
    buf.push('\n');
    store.save(Scope::Branch, ITERATION_STATE_KEY, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::FsStateStore;
    use crate::test_support::TestRepo;

    #[test]
    fn intent_record_round_trips() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        assert_eq!(load_intent(&store).expect("load"), None);

        let record = IntentRecord {
            slug: "billing-retry".to_string(),
            branch: "ai-dlc/billing-retry".to_string(),
            status: IntentStatus::Active,
        };
        write_intent(&store, &record).expect("write");
        assert_eq!(load_intent(&store).expect("load"), Some(record));
    }

    #[test]
    fn iteration_state_round_trips_at_branch_scope() {
        let repo = TestRepo::new().expect("repo");
        let store = FsStateStore::new(repo.root(), repo.global_state_root());
        assert_eq!(load_iteration_state(&store).expect("load"), None);

        let state = IterationState::new(vec!["builder".to_string()], Some(3)).expect("state");
        write_iteration_state(&store, &state).expect("write");
        assert_eq!(load_iteration_state(&store).expect("load"), Some(state));

        repo.switch_new_branch("elsewhere").expect("switch");
        assert_eq!(load_iteration_state(&store).expect("load"), None);
    }
}
