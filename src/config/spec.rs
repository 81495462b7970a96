//! Stack file specification types.
//!
//! This module defines the structs that map to the `cairn.stack.yaml` file:
//! stack metadata, state backend settings, and the flat list of resource
//! declarations making up the desired state.

use serde::{Deserialize, Serialize};

/// The root structure of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Stack-level metadata.
    pub stack: StackMeta,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Desired resources, in declaration order.
    pub resources: Vec<ResourceConfig>,
}

/// Stack-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMeta {
    /// Unique name for this stack (environment instance).
    pub name: String,
    /// Optional human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory holding state documents (for the local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
}

/// Declaration of a single desired resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Unique logical name within the stack.
    pub name: String,
    /// Provider type token, e.g. `gcp:firestore/Database`.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Explicit dependencies in addition to inferred reference edges.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Input properties; string values may embed `${name.attr}` references.
    #[serde(default = "default_inputs")]
    pub inputs: serde_json::Value,
}

fn default_inputs() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl StackConfig {
    /// Returns the logical names of all declared resources.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Looks up a resource declaration by logical name.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
stack:
  name: people-demo
state:
  backend: local
resources:
  - name: database
    type: gcp:firestore/Database
    inputs:
      locationId: nam5
      type: FIRESTORE_NATIVE
  - name: person-doc
    type: gcp:firestore/Document
    inputs:
      database: ${database.name}
      collection: person
"#;

    #[test]
    fn test_parse_stack_yaml() {
        let config: StackConfig = serde_yaml::from_str(SAMPLE).expect("parse failed");
        assert_eq!(config.stack.name, "people-demo");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.resource_names(), vec!["database", "person-doc"]);

        let doc = config.get_resource("person-doc").expect("missing resource");
        assert_eq!(doc.type_token, "gcp:firestore/Document");
        assert_eq!(doc.inputs["database"], "${database.name}");
    }

    #[test]
    fn test_inputs_default_to_empty_object() {
        let yaml = "stack:\n  name: s\nresources:\n  - name: a\n    type: t:m/R\n";
        let config: StackConfig = serde_yaml::from_str(yaml).expect("parse failed");
        assert!(config.resources[0].inputs.as_object().is_some_and(serde_json::Map::is_empty));
        assert!(config.resources[0].depends_on.is_empty());
    }
}
