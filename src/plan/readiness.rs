//! Readiness — which planned actions may be dispatched now.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::state::{Action, FailedAction, Plan};

/// Actions that are neither done nor failed and whose dependencies are all
/// done, in plan order.
///
/// Failed actions are never retried automatically, and anything depending on
/// them stays blocked.
pub fn ready<'a>(
    plan: &'a Plan,
    done_ids: &BTreeSet<String>,
    failed_actions: &BTreeMap<String, FailedAction>,
) -> Vec<&'a Action> {
    plan.actions
        .iter()
        .filter(|a| !done_ids.contains(&a.id))
        .filter(|a| !failed_actions.contains_key(&a.id))
        .filter(|a| a.depends_on.iter().all(|dep| done_ids.contains(dep)))
        .collect()
}

/// Actions that can never run: they depend, directly or transitively, on a
/// failed action.
pub fn blocked<'a>(
    plan: &'a Plan,
    done_ids: &BTreeSet<String>,
    failed_actions: &BTreeMap<String, FailedAction>,
) -> Vec<&'a Action> {
    let mut poisoned: HashSet<&str> = failed_actions.keys().map(String::as_str).collect();
    // The plan is acyclic, so a fixed point is reached within len() passes.
    loop {
        let before = poisoned.len();
        for action in &plan.actions {
            if !done_ids.contains(&action.id)
                && action.depends_on.iter().any(|d| poisoned.contains(d.as_str()))
            {
                poisoned.insert(action.id.as_str());
            }
        }
        if poisoned.len() == before {
            break;
        }
    }
    plan.actions
        .iter()
        .filter(|a| !failed_actions.contains_key(&a.id))
        .filter(|a| poisoned.contains(a.id.as_str()))
        .collect()
}
