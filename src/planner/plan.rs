//! Execution plan derived from a diff.
//!
//! A plan is an ordered list of entries, each carrying the indices of the
//! entries it depends on. Deletes come first, ordered so that dependents are
//! removed before the resources they depend on (computed from the
//! dependencies persisted in state, since deleted resources are no longer in
//! the desired graph). Creates, updates and no-ops follow in topological
//! order. A replacement is a delete entry plus a create entry that depends
//! on it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::graph::DependencyGraph;
use crate::planner::diff::{DiffResult, DiffType};
use crate::resource::ResourceSet;
use crate::state::{StackState, StateRecord};

/// Action to take for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// No change; present so dependents can resolve recorded outputs.
    Noop,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Action to take.
    pub action: ActionType,
    /// Logical name of the resource.
    pub logical_name: String,
    /// Type token (the recorded one for deletes, the desired one otherwise).
    pub type_token: String,
    /// Human-readable reason for the action.
    pub reason: String,
    /// Indices of plan entries that must complete before this one.
    pub dependencies: Vec<usize>,
}

/// An ordered execution plan.
#[derive(Debug)]
pub struct Plan {
    /// Stack this plan applies to.
    pub stack: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Entries in execution order.
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    /// Builds a plan from a diff result.
    ///
    /// Entry order is a valid serial execution order; the per-entry
    /// dependency indices allow independent entries to run concurrently.
    #[must_use]
    pub fn from_diff(
        stack: &str,
        diff: &DiffResult,
        resources: &ResourceSet,
        graph: &DependencyGraph,
        state: Option<&StackState>,
    ) -> Self {
        let diff_by_name: HashMap<&str, &crate::planner::diff::ResourceDiff> =
            diff.diffs.iter().map(|d| (d.name.as_str(), d)).collect();

        let mut entries = Vec::new();
        let mut entry_index: HashMap<String, usize> = HashMap::new();

        // Deletes first: orphaned records plus the old half of replacements.
        let mut doomed: Vec<&StateRecord> = Vec::new();
        if let Some(state) = state {
            for d in &diff.diffs {
                if matches!(d.diff_type, DiffType::Delete | DiffType::Replace) {
                    if let Some(record) = state.get_record(&d.name) {
                        doomed.push(record);
                    }
                }
            }
        }
        let mut delete_index: HashMap<String, usize> = HashMap::new();
        for (record, depends_on) in order_deletes(&doomed) {
            let reason = match diff_by_name.get(record.logical_name.as_str()) {
                Some(d) if d.diff_type == DiffType::Replace => {
                    format!("type changed to {}", d.type_token)
                }
                _ => String::from("no longer declared"),
            };
            let dependencies = depends_on
                .iter()
                .filter_map(|name| delete_index.get(name).copied())
                .collect();
            delete_index.insert(record.logical_name.clone(), entries.len());
            entries.push(PlanEntry {
                action: ActionType::Delete,
                logical_name: record.logical_name.clone(),
                type_token: record.type_token.clone(),
                reason,
                dependencies,
            });
        }

        // Then creates, updates and no-ops in dependency order.
        for name in graph.apply_order() {
            let Some(resource) = resources.get(name) else {
                continue;
            };
            let Some(d) = diff_by_name.get(name.as_str()) else {
                continue;
            };
            let (action, reason) = match d.diff_type {
                DiffType::Create => (ActionType::Create, String::from("not in state")),
                DiffType::Replace => (
                    ActionType::Create,
                    String::from("recreate after type change"),
                ),
                DiffType::Update => {
                    let fields: Vec<&str> =
                        d.details.iter().map(|f| f.field.as_str()).collect();
                    (ActionType::Update, format!("inputs changed: {}", fields.join(", ")))
                }
                DiffType::NoChange => (ActionType::Noop, String::from("up to date")),
                DiffType::Delete => continue,
            };

            let mut dependencies: Vec<usize> = graph
                .dependencies_of(name)
                .iter()
                .filter_map(|dep| entry_index.get(*dep).copied())
                .collect();
            // The replacement create waits for its own delete.
            if d.diff_type == DiffType::Replace {
                if let Some(&idx) = delete_index.get(name) {
                    dependencies.push(idx);
                }
            }

            entry_index.insert(name.clone(), entries.len());
            entries.push(PlanEntry {
                action,
                logical_name: name.clone(),
                type_token: resource.type_token.clone(),
                reason,
                dependencies,
            });
        }

        debug!("Planned {} entries for stack {}", entries.len(), stack);
        Self {
            stack: stack.to_string(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// Builds a plan that deletes every recorded resource.
    #[must_use]
    pub fn destroy(stack: &str, state: &StackState) -> Self {
        let records: Vec<&StateRecord> = state.records.values().collect();
        let mut entries = Vec::new();
        let mut entry_index: HashMap<String, usize> = HashMap::new();

        for (record, depends_on) in order_deletes(&records) {
            let dependencies = depends_on
                .iter()
                .filter_map(|name| entry_index.get(name).copied())
                .collect();
            entry_index.insert(record.logical_name.clone(), entries.len());
            entries.push(PlanEntry {
                action: ActionType::Delete,
                logical_name: record.logical_name.clone(),
                type_token: record.type_token.clone(),
                reason: String::from("destroy requested"),
                dependencies,
            });
        }

        Self {
            stack: stack.to_string(),
            created_at: Utc::now(),
            entries,
        }
    }

    /// Returns the number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: ActionType) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Returns true if no entry requires a provider call.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|e| e.action == ActionType::Noop)
    }

    /// Returns the entries that require a provider call.
    #[must_use]
    pub fn actionable_entries(&self) -> Vec<&PlanEntry> {
        self.entries
            .iter()
            .filter(|e| e.action != ActionType::Noop)
            .collect()
    }
}

/// Orders records dependents-first for deletion.
///
/// Returns each record paired with the names of its dependents within the
/// doomed set, which become entry dependencies (a resource is deleted only
/// after everything that depended on it is gone). Uses the dependency lists
/// persisted in state. If the persisted edges are inconsistent and the walk
/// stalls, the remainder is appended in name order without dependencies.
fn order_deletes<'a>(records: &[&'a StateRecord]) -> Vec<(&'a StateRecord, Vec<String>)> {
    let names: HashMap<&str, &&StateRecord> =
        records.iter().map(|r| (r.logical_name.as_str(), r)).collect();

    // dependents[x] = doomed resources whose records depend on x.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for record in records {
        remaining.entry(record.logical_name.as_str()).or_insert(0);
        for dep in &record.dependencies {
            if names.contains_key(dep.as_str()) {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(record.logical_name.as_str());
                *remaining.entry(dep.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: Vec<&str> = remaining
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();
    ready.sort_unstable();

    let mut ordered = Vec::with_capacity(records.len());
    let mut emitted: HashMap<&str, bool> = HashMap::new();
    while let Some(name) = ready.pop() {
        let record = names[name];
        emitted.insert(name, true);
        let deps = dependents
            .get(name)
            .map(|d| d.iter().map(|&s| s.to_string()).collect())
            .unwrap_or_default();
        ordered.push((*record, deps));

        let mut unblocked = Vec::new();
        for dep in &record.dependencies {
            if let Some(count) = remaining.get_mut(dep.as_str()) {
                *count -= 1;
                if *count == 0 {
                    unblocked.push(dep.as_str());
                }
            }
        }
        unblocked.sort_unstable();
        for name in unblocked {
            ready.push(name);
        }
    }

    if ordered.len() < records.len() {
        let mut leftover: Vec<&&StateRecord> = records
            .iter()
            .filter(|r| !emitted.contains_key(r.logical_name.as_str()))
            .collect();
        leftover.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        for record in leftover {
            ordered.push((*record, Vec::new()));
        }
    }

    ordered
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Plan for stack {}: {} to create, {} to update, {} to delete",
            self.stack,
            self.count(ActionType::Create),
            self.count(ActionType::Update),
            self.count(ActionType::Delete),
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  {} {} ({}) - {}",
                entry.action, entry.logical_name, entry.type_token, entry.reason
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::diff::DiffEngine;
    use crate::provider::ProviderRegistry;
    use serde_json::json;

    fn record(name: &str, deps: Vec<String>) -> StateRecord {
        StateRecord::new(
            name,
            "test:core/Thing",
            &format!("id-{name}"),
            "hash",
            json!({}),
            json!({}),
            deps,
        )
    }

    #[test]
    fn test_creates_follow_dependency_order() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({"x": 1}), vec![])
            .expect("declare failed");
        set.declare(
            "test:core/Thing",
            "child",
            &json!({"ref": "${base.id}"}),
            vec![],
        )
        .expect("declare failed");
        let graph = DependencyGraph::build(&set).expect("graph failed");
        let diff = DiffEngine::new().compute(&set, None, &ProviderRegistry::new());

        let plan = Plan::from_diff("demo", &diff, &set, &graph, None);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].logical_name, "base");
        assert_eq!(plan.entries[1].logical_name, "child");
        assert_eq!(plan.entries[1].dependencies, vec![0]);
    }

    #[test]
    fn test_deletes_come_first_dependents_before_dependencies() {
        let mut state = StackState::new("demo");
        state.set_record(record("base", vec![]));
        state.set_record(record("child", vec![String::from("base")]));

        let set = ResourceSet::new();
        let graph = DependencyGraph::build(&set).expect("graph failed");
        let diff = DiffEngine::new().compute(&set, Some(&state), &ProviderRegistry::new());

        let plan = Plan::from_diff("demo", &diff, &set, &graph, Some(&state));
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].logical_name, "child");
        assert_eq!(plan.entries[1].logical_name, "base");
        assert_eq!(plan.entries[1].dependencies, vec![0]);
        assert_eq!(plan.count(ActionType::Delete), 2);
    }

    #[test]
    fn test_replacement_create_waits_for_delete() {
        let mut state = StackState::new("demo");
        state.set_record(record("thing", vec![]));

        let mut set = ResourceSet::new();
        set.declare("test:core/Other", "thing", &json!({"x": 1}), vec![])
            .expect("declare failed");
        let graph = DependencyGraph::build(&set).expect("graph failed");
        let diff = DiffEngine::new().compute(&set, Some(&state), &ProviderRegistry::new());

        let plan = Plan::from_diff("demo", &diff, &set, &graph, Some(&state));
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].action, ActionType::Delete);
        assert_eq!(plan.entries[0].type_token, "test:core/Thing");
        assert_eq!(plan.entries[1].action, ActionType::Create);
        assert_eq!(plan.entries[1].type_token, "test:core/Other");
        assert_eq!(plan.entries[1].dependencies, vec![0]);
    }

    #[test]
    fn test_noop_entries_are_kept_for_output_resolution() {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "base", &json!({"x": 1}), vec![])
            .expect("declare failed");
        let hasher = crate::config::InputHasher::new();
        let resource = set.get("base").expect("missing");
        let mut state = StackState::new("demo");
        state.set_record(StateRecord::new(
            "base",
            "test:core/Thing",
            "id-base",
            &hasher.hash_resource(resource),
            resource.canonical_inputs(),
            json!({"id": "id-base"}),
            vec![],
        ));

        let graph = DependencyGraph::build(&set).expect("graph failed");
        let diff = DiffEngine::new().compute(&set, Some(&state), &ProviderRegistry::new());
        let plan = Plan::from_diff("demo", &diff, &set, &graph, Some(&state));

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].action, ActionType::Noop);
        assert!(plan.is_noop());
        assert!(plan.actionable_entries().is_empty());
    }

    #[test]
    fn test_destroy_plan_orders_dependents_first() {
        let mut state = StackState::new("demo");
        state.set_record(record("a", vec![]));
        state.set_record(record("b", vec![String::from("a")]));
        state.set_record(record("c", vec![String::from("b")]));

        let plan = Plan::destroy("demo", &state);
        let order: Vec<&str> = plan.entries.iter().map(|e| e.logical_name.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }
}
