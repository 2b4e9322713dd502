//! Plan builder — turns proposed actions into a validated, cycle-free plan.
//!
//! Cycles are not rejected. Every dependency edge that closes a cycle is
//! dropped and reported, so a single planner mistake does not discard the
//! whole plan.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::state::{Action, Plan, StateUpdate};

/// Why a dependency edge was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The edge was part of a dependency cycle.
    Cycle,
    /// The dependency id is not in the plan.
    UnknownDependency,
    /// The action depended on itself.
    SelfDependency,
    /// The same dependency was listed twice.
    Duplicate,
}

/// A dependency edge removed while building the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedEdge {
    pub action_id: String,
    pub dependency: String,
    pub reason: DropReason,
}

/// Outcome of a build: what was changed to make the plan valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub dropped_edges: Vec<DroppedEdge>,
    /// Ids of actions discarded because an earlier action used the same id.
    pub duplicate_actions: Vec<String>,
    pub had_cycle: bool,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_edges.is_empty() && self.duplicate_actions.is_empty()
    }
}

/// Builds validated plans.
pub struct PlanBuilder;

impl PlanBuilder {
    /// Validate and repair a list of proposed actions.
    pub fn build(proposed: Vec<Action>) -> (Plan, BuildReport) {
        let mut report = BuildReport::default();

        // Ids are the planner's; keep the first action for a repeated id.
        let mut seen = HashSet::new();
        let mut actions = Vec::with_capacity(proposed.len());
        for action in proposed {
            if seen.insert(action.id.clone()) {
                actions.push(action);
            } else {
                report.duplicate_actions.push(action.id);
            }
        }

        let known: HashSet<String> = actions.iter().map(|a| a.id.clone()).collect();
        for action in &mut actions {
            let mut kept = Vec::with_capacity(action.depends_on.len());
            for dep in action.depends_on.drain(..) {
                let reason = if dep == action.id {
                    Some(DropReason::SelfDependency)
                } else if !known.contains(&dep) {
                    Some(DropReason::UnknownDependency)
                } else if kept.contains(&dep) {
                    Some(DropReason::Duplicate)
                } else {
                    None
                };
                match reason {
                    Some(reason) => report.dropped_edges.push(DroppedEdge {
                        action_id: action.id.clone(),
                        dependency: dep,
                        reason,
                    }),
                    None => kept.push(dep),
                }
            }
            action.depends_on = kept;
        }

        if has_cycle(&actions) {
            report.had_cycle = true;
            let cyclic = cyclic_edges(&actions);
            for action in &mut actions {
                action.depends_on.retain(|dep| {
                    let on_cycle = cyclic.contains(&(action.id.clone(), dep.clone()));
                    if on_cycle {
                        report.dropped_edges.push(DroppedEdge {
                            action_id: action.id.clone(),
                            dependency: dep.clone(),
                            reason: DropReason::Cycle,
                        });
                    }
                    !on_cycle
                });
            }
        }

        for edge in &report.dropped_edges {
            tracing::warn!(
                action_id = %edge.action_id,
                dependency = %edge.dependency,
                reason = ?edge.reason,
                "Dropped dependency edge from plan"
            );
        }
        if !report.duplicate_actions.is_empty() {
            tracing::warn!(ids = ?report.duplicate_actions, "Dropped actions with duplicate ids");
        }

        (Plan { actions }, report)
    }

    /// Build a plan and the state update that installs it.
    ///
    /// A new plan invalidates all prior progress.
    pub fn build_update(proposed: Vec<Action>) -> (StateUpdate, BuildReport) {
        let (plan, report) = Self::build(proposed);
        (StateUpdate::new().with_progress_reset().with_plan(plan), report)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color DFS: a back-edge to a gray node means a cycle.
pub fn has_cycle(actions: &[Action]) -> bool {
    let deps: HashMap<&str, &[String]> = actions
        .iter()
        .map(|a| (a.id.as_str(), a.depends_on.as_slice()))
        .collect();
    let mut colors: HashMap<&str, Color> = deps.keys().map(|id| (*id, Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> bool {
        colors.insert(id, Color::Gray);
        for dep in deps.get(id).copied().unwrap_or_default() {
            match colors.get(dep.as_str()).copied() {
                Some(Color::Gray) => return true,
                Some(Color::White) => {
                    if visit(dep.as_str(), deps, colors) {
                        return true;
                    }
                }
                Some(Color::Black) | None => {}
            }
        }
        colors.insert(id, Color::Black);
        false
    }

    for action in actions {
        if colors.get(action.id.as_str()) == Some(&Color::White)
            && visit(action.id.as_str(), &deps, &mut colors)
        {
            return true;
        }
    }
    false
}

/// Every `(action, dependency)` edge from whose dependency the action is
/// reachable again, found by BFS over the dependency graph.
fn cyclic_edges(actions: &[Action]) -> HashSet<(String, String)> {
    let deps: HashMap<&str, &[String]> = actions
        .iter()
        .map(|a| (a.id.as_str(), a.depends_on.as_slice()))
        .collect();

    let reaches = |from: &str, target: &str| -> bool {
        let mut queue = VecDeque::from([from]);
        let mut visited = HashSet::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            for next in deps.get(current).copied().unwrap_or_default() {
                if visited.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }
        false
    };

    let mut cyclic = HashSet::new();
    for action in actions {
        for dep in &action.depends_on {
            if reaches(dep, &action.id) {
                cyclic.insert((action.id.clone(), dep.clone()));
            }
        }
    }
    cyclic
}
