//! Diff engine for comparing desired resources against last-known state.
//!
//! Classification per resource: `Create` when no record exists, `Replace`
//! when the record's type token differs (the external resource cannot be
//! mutated into a new type), `Update` when inputs differ from the recorded
//! ones, `NoChange` otherwise. Records with no desired counterpart become
//! `Delete`. Comparison uses the canonical unresolved input encoding, with
//! provider-declared server-generated fields stripped first.

use tracing::debug;

use crate::config::InputHasher;
use crate::provider::ProviderRegistry;
use crate::resource::{Resource, ResourceSet};
use crate::state::{StackState, StateRecord};

/// Engine for computing diffs between desired and last-known state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Input hasher for the fast equality path.
    hasher: InputHasher,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs to be updated in place.
    Update,
    /// Resource must be deleted and recreated (type token changed).
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Logical name.
    pub name: String,
    /// Type token of the desired resource (or the recorded one for deletes).
    pub type_token: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
    /// Hash of the desired canonical inputs (if the resource is desired).
    pub new_hash: Option<String>,
}

/// Detail about a specific difference.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create (including replacements).
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete (excluding replacements).
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: InputHasher::new(),
        }
    }

    /// Computes the diff between the desired set and the last-known state.
    #[must_use]
    pub fn compute(
        &self,
        resources: &ResourceSet,
        state: Option<&StackState>,
        providers: &ProviderRegistry,
    ) -> DiffResult {
        let mut diffs = Vec::new();

        for resource in resources {
            let record = state.and_then(|s| s.get_record(&resource.logical_name));
            diffs.push(self.diff_resource(resource, record, providers));
        }

        // Records with no desired counterpart are deleted.
        if let Some(state) = state {
            let mut orphaned: Vec<&StateRecord> = state
                .records
                .values()
                .filter(|r| !resources.contains(&r.logical_name))
                .collect();
            orphaned.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));

            for record in orphaned {
                debug!("Resource {} left the desired set", record.logical_name);
                diffs.push(ResourceDiff {
                    name: record.logical_name.clone(),
                    type_token: record.type_token.clone(),
                    diff_type: DiffType::Delete,
                    details: vec![DiffDetail {
                        field: String::from("resource"),
                        old_value: Some(record.resource_id.clone()),
                        new_value: None,
                    }],
                    new_hash: None,
                });
            }
        }

        let creates = diffs
            .iter()
            .filter(|d| matches!(d.diff_type, DiffType::Create | DiffType::Replace))
            .count();
        let updates = diffs.iter().filter(|d| d.diff_type == DiffType::Update).count();
        let deletes = diffs.iter().filter(|d| d.diff_type == DiffType::Delete).count();
        let unchanged = diffs.iter().filter(|d| d.diff_type == DiffType::NoChange).count();

        DiffResult {
            diffs,
            creates,
            updates,
            deletes,
            unchanged,
        }
    }

    /// Computes the diff for a single desired resource.
    fn diff_resource(
        &self,
        resource: &Resource,
        record: Option<&StateRecord>,
        providers: &ProviderRegistry,
    ) -> ResourceDiff {
        let desired = resource.canonical_inputs();
        let new_hash = self.hasher.hash_resource(resource);

        let Some(record) = record else {
            debug!("Resource {} needs to be created", resource.logical_name);
            return ResourceDiff {
                name: resource.logical_name.clone(),
                type_token: resource.type_token.clone(),
                diff_type: DiffType::Create,
                details: vec![],
                new_hash: Some(new_hash),
            };
        };

        if record.type_token != resource.type_token {
            debug!(
                "Resource {} changed type, replacing ({} -> {})",
                resource.logical_name, record.type_token, resource.type_token
            );
            return ResourceDiff {
                name: resource.logical_name.clone(),
                type_token: resource.type_token.clone(),
                diff_type: DiffType::Replace,
                details: vec![DiffDetail {
                    field: String::from("type"),
                    old_value: Some(record.type_token.clone()),
                    new_value: Some(resource.type_token.clone()),
                }],
                new_hash: Some(new_hash),
            };
        }

        // Fast path: identical hashes mean identical canonical inputs.
        if record.input_hash == new_hash {
            return ResourceDiff {
                name: resource.logical_name.clone(),
                type_token: resource.type_token.clone(),
                diff_type: DiffType::NoChange,
                details: vec![],
                new_hash: Some(new_hash),
            };
        }

        let ignored = providers.ignored_fields(&resource.type_token);
        let details = Self::field_details(&record.last_inputs, &desired, &ignored);

        if details.is_empty() {
            // Only server-generated fields differ.
            debug!("Resource {} differs only in ignored fields", resource.logical_name);
            return ResourceDiff {
                name: resource.logical_name.clone(),
                type_token: resource.type_token.clone(),
                diff_type: DiffType::NoChange,
                details: vec![],
                new_hash: Some(new_hash),
            };
        }

        debug!("Resource {} needs update", resource.logical_name);
        ResourceDiff {
            name: resource.logical_name.clone(),
            type_token: resource.type_token.clone(),
            diff_type: DiffType::Update,
            details,
            new_hash: Some(new_hash),
        }
    }

    /// Computes top-level field differences, skipping ignored fields.
    fn field_details(
        old: &serde_json::Value,
        new: &serde_json::Value,
        ignored: &[String],
    ) -> Vec<DiffDetail> {
        let empty = serde_json::Map::new();
        let old_fields = old.as_object().unwrap_or(&empty);
        let new_fields = new.as_object().unwrap_or(&empty);

        let mut keys: Vec<&String> = old_fields.keys().chain(new_fields.keys()).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut details = Vec::new();
        for key in keys {
            if ignored.iter().any(|f| f == key) {
                continue;
            }
            let old_value = old_fields.get(key);
            let new_value = new_fields.get(key);
            if old_value != new_value {
                details.push(DiffDetail {
                    field: key.clone(),
                    old_value: old_value.map(serde_json::Value::to_string),
                    new_value: new_value.map(serde_json::Value::to_string),
                });
            }
        }
        details
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use crate::state::StateRecord;
    use serde_json::json;
    use std::sync::Arc;

    fn resource_set(inputs: serde_json::Value) -> ResourceSet {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "thing", &inputs, vec![])
            .expect("declare failed");
        set
    }

    fn record_for(set: &ResourceSet) -> StateRecord {
        let resource = set.get("thing").expect("missing");
        let hasher = InputHasher::new();
        StateRecord::new(
            "thing",
            &resource.type_token,
            "id-1",
            &hasher.hash_resource(resource),
            resource.canonical_inputs(),
            json!({}),
            vec![],
        )
    }

    #[test]
    fn test_missing_record_plans_create() {
        let set = resource_set(json!({"x": 1}));
        let diff = DiffEngine::new().compute(&set, None, &ProviderRegistry::new());
        assert_eq!(diff.creates, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Create);
    }

    #[test]
    fn test_unchanged_inputs_plan_noop() {
        let set = resource_set(json!({"x": 1}));
        let mut state = StackState::new("demo");
        state.set_record(record_for(&set));

        let diff = DiffEngine::new().compute(&set, Some(&state), &ProviderRegistry::new());
        assert_eq!(diff.unchanged, 1);
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_changed_inputs_plan_update_with_details() {
        let old_set = resource_set(json!({"x": 1, "y": "a"}));
        let mut state = StackState::new("demo");
        state.set_record(record_for(&old_set));

        let new_set = resource_set(json!({"x": 2, "y": "a"}));
        let diff = DiffEngine::new().compute(&new_set, Some(&state), &ProviderRegistry::new());
        assert_eq!(diff.updates, 1);
        assert_eq!(diff.diffs[0].details.len(), 1);
        assert_eq!(diff.diffs[0].details[0].field, "x");
    }

    #[test]
    fn test_server_generated_fields_are_ignored() {
        let old_set = resource_set(json!({"x": 1, "etag": "abc"}));
        let mut state = StackState::new("demo");
        state.set_record(record_for(&old_set));

        let provider = MemoryProvider::new();
        provider.set_ignored_fields("test:core/Thing", vec![String::from("etag")]);
        let mut registry = ProviderRegistry::new();
        registry.register("test", Arc::new(provider));

        let new_set = resource_set(json!({"x": 1, "etag": "zzz"}));
        let diff = DiffEngine::new().compute(&new_set, Some(&state), &registry);
        assert_eq!(diff.unchanged, 1);
        assert_eq!(diff.updates, 0);
    }

    #[test]
    fn test_orphaned_record_plans_delete() {
        let old_set = resource_set(json!({"x": 1}));
        let mut state = StackState::new("demo");
        state.set_record(record_for(&old_set));

        let empty = ResourceSet::new();
        let diff = DiffEngine::new().compute(&empty, Some(&state), &ProviderRegistry::new());
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Delete);
    }

    #[test]
    fn test_type_change_plans_replace() {
        let old_set = resource_set(json!({"x": 1}));
        let mut state = StackState::new("demo");
        state.set_record(record_for(&old_set));

        let mut new_set = ResourceSet::new();
        new_set
            .declare("test:core/Other", "thing", &json!({"x": 1}), vec![])
            .expect("declare failed");

        let diff = DiffEngine::new().compute(&new_set, Some(&state), &ProviderRegistry::new());
        assert_eq!(diff.diffs[0].diff_type, DiffType::Replace);
        assert_eq!(diff.creates, 1);
    }
}
