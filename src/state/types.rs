//! State types for tracking applied resources.
//!
//! A [`StackState`] is the persisted last-known state of one stack: a
//! versioned document holding one [`StateRecord`] per applied resource plus
//! a bounded run history. Records are what planning diffs against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current version of the state document format.
pub const STATE_VERSION: &str = "1.0";

/// The persisted state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Stack name this state belongs to.
    pub stack: String,
    /// Records of applied resources, keyed by logical name.
    pub records: HashMap<String, StateRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent run history.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// The last applied state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical name within the stack.
    pub logical_name: String,
    /// Provider type token the resource was created with.
    pub type_token: String,
    /// Provider-assigned id of the external resource.
    pub resource_id: String,
    /// Hash of the canonical unresolved inputs at last apply.
    pub input_hash: String,
    /// Canonical unresolved inputs at last apply.
    pub last_inputs: serde_json::Value,
    /// Outputs produced by the last apply.
    pub last_outputs: serde_json::Value,
    /// Logical names this resource depended on when applied.
    ///
    /// Persisted so deletions can be ordered after the resource has left the
    /// desired set and its graph edges are gone.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Resources touched by the run.
    pub resources: Vec<String>,
    /// Whether every touched resource succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in the history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Plan and apply (`up`).
    Up,
    /// Plan all-delete and apply (`destroy`).
    Destroy,
}

impl StackState {
    /// Creates a new empty stack state.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            records: HashMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by logical name.
    #[must_use]
    pub fn get_record(&self, logical_name: &str) -> Option<&StateRecord> {
        self.records.get(logical_name)
    }

    /// Adds or replaces a record, preserving the original creation time on
    /// replacement.
    pub fn set_record(&mut self, mut record: StateRecord) {
        if let Some(existing) = self.records.get(&record.logical_name) {
            record.created_at = existing.created_at;
        }
        self.records.insert(record.logical_name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by logical name.
    pub fn remove_record(&mut self, logical_name: &str) -> Option<StateRecord> {
        let removed = self.records.remove(logical_name);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns all recorded logical names.
    #[must_use]
    pub fn record_names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a history entry, keeping only the most recent entries.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl StateRecord {
    /// Creates a new record for a freshly applied resource.
    #[must_use]
    pub fn new(
        logical_name: &str,
        type_token: &str,
        resource_id: &str,
        input_hash: &str,
        last_inputs: serde_json::Value,
        last_outputs: serde_json::Value,
        dependencies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            logical_name: logical_name.to_string(),
            type_token: type_token.to_string(),
            resource_id: resource_id.to_string(),
            input_hash: input_hash.to_string(),
            last_inputs,
            last_outputs,
            dependencies,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the recorded outputs as an object map.
    #[must_use]
    pub fn outputs_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.last_outputs.as_object().cloned().unwrap_or_default()
    }
}

impl RunHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: RunOperation, resources: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Up => "up",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
