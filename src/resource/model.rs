//! Desired-state resource declarations.
//!
//! A [`Resource`] is the immutable description of one desired resource: a
//! type token, a unique logical name, reference-bearing inputs, and any
//! explicit dependencies. A [`ResourceSet`] holds the declarations for one
//! run and rejects duplicate logical names.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::ResourceConfig;
use crate::error::{CairnError, ConfigError, Result};

use super::value::{OutputRef, Value};

/// The immutable description of a single desired resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Unique logical name within the stack.
    pub logical_name: String,
    /// Provider type token, e.g. `gcp:firestore/Database`.
    pub type_token: String,
    /// Input properties; values may embed deferred output references.
    pub inputs: BTreeMap<String, Value>,
    /// Explicit dependencies in addition to those inferred from references.
    pub depends_on: BTreeSet<String>,
}

/// The set of resources declared for one run.
#[derive(Debug, Default)]
pub struct ResourceSet {
    /// Resources in declaration order.
    resources: Vec<Resource>,
    /// Index from logical name into `resources`.
    by_name: HashMap<String, usize>,
}

impl Resource {
    /// Returns every output reference embedded in this resource's inputs.
    #[must_use]
    pub fn references(&self) -> Vec<OutputRef> {
        let mut refs = Vec::new();
        for value in self.inputs.values() {
            refs.extend(value.references());
        }
        refs
    }

    /// Returns the logical names this resource depends on, deduplicated:
    /// inferred reference targets plus explicit `depends_on` entries.
    #[must_use]
    pub fn dependency_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.references().into_iter().map(|r| r.resource).collect();
        names.extend(self.depends_on.iter().cloned());
        names
    }

    /// Renders the inputs in their canonical unresolved JSON form.
    #[must_use]
    pub fn canonical_inputs(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (key, value) in &self.inputs {
            object.insert(key.clone(), value.canonical_json());
        }
        serde_json::Value::Object(object)
    }
}

impl ResourceSet {
    /// Creates an empty resource set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource in this run.
    ///
    /// Inputs are parsed for embedded references but not resolved; resolution
    /// happens in the executor once the referenced outputs exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateName`] if the logical name is already
    /// declared, or [`ConfigError::InvalidReference`] if an input string
    /// carries a malformed reference expression.
    pub fn declare(
        &mut self,
        type_token: impl Into<String>,
        logical_name: impl Into<String>,
        inputs: &serde_json::Value,
        depends_on: impl IntoIterator<Item = String>,
    ) -> Result<&Resource> {
        let logical_name = logical_name.into();
        if self.by_name.contains_key(&logical_name) {
            return Err(CairnError::Config(ConfigError::DuplicateName {
                name: logical_name,
            }));
        }

        let mut parsed = BTreeMap::new();
        if let serde_json::Value::Object(fields) = inputs {
            for (key, value) in fields {
                let value = Value::from_json(value).map_err(|reference| {
                    CairnError::Config(ConfigError::InvalidReference {
                        reference,
                        resource: logical_name.clone(),
                    })
                })?;
                parsed.insert(key.clone(), value);
            }
        }

        let resource = Resource {
            logical_name: logical_name.clone(),
            type_token: type_token.into(),
            inputs: parsed,
            depends_on: depends_on.into_iter().collect(),
        };

        self.by_name.insert(logical_name, self.resources.len());
        self.resources.push(resource);
        Ok(&self.resources[self.resources.len() - 1])
    }

    /// Builds a resource set from parsed stack configuration entries.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names or malformed references.
    pub fn from_configs(configs: &[ResourceConfig]) -> Result<Self> {
        let mut set = Self::new();
        for config in configs {
            set.declare(
                &config.type_token,
                &config.name,
                &config.inputs,
                config.depends_on.iter().cloned(),
            )?;
        }
        Ok(set)
    }

    /// Returns the resources in declaration order.
    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    /// Looks up a resource by logical name.
    #[must_use]
    pub fn get(&self, logical_name: &str) -> Option<&Resource> {
        self.by_name
            .get(logical_name)
            .map(|&idx| &self.resources[idx])
    }

    /// Returns true if a resource with this logical name is declared.
    #[must_use]
    pub fn contains(&self, logical_name: &str) -> bool {
        self.by_name.contains_key(logical_name)
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns all logical names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resources
            .iter()
            .map(|r| r.logical_name.as_str())
            .collect()
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declare_and_get() {
        let mut set = ResourceSet::new();
        set.declare(
            "gcp:storage/Bucket",
            "bucket",
            &json!({"location": "US"}),
            vec![],
        )
        .expect("declare failed");

        assert_eq!(set.len(), 1);
        let resource = set.get("bucket").expect("missing resource");
        assert_eq!(resource.type_token, "gcp:storage/Bucket");
        assert!(resource.dependency_names().is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut set = ResourceSet::new();
        set.declare("gcp:storage/Bucket", "bucket", &json!({}), vec![])
            .expect("first declare failed");

        let err = set
            .declare("gcp:storage/BucketObject", "bucket", &json!({}), vec![])
            .expect_err("duplicate should fail");
        assert!(matches!(
            err,
            CairnError::Config(ConfigError::DuplicateName { name }) if name == "bucket"
        ));
    }

    #[test]
    fn test_dependencies_merge_references_and_explicit() {
        let mut set = ResourceSet::new();
        set.declare(
            "gcp:cloudfunctionsv2/Function",
            "function",
            &json!({"source": {"bucket": "${bucket.name}"}}),
            vec![String::from("database")],
        )
        .expect("declare failed");

        let deps = set.get("function").expect("missing").dependency_names();
        assert!(deps.contains("bucket"));
        assert!(deps.contains("database"));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_malformed_reference_rejected() {
        let mut set = ResourceSet::new();
        let err = set
            .declare("gcp:storage/Bucket", "bucket", &json!({"name": "${oops"}), vec![])
            .expect_err("malformed reference should fail");
        assert!(matches!(
            err,
            CairnError::Config(ConfigError::InvalidReference { resource, .. }) if resource == "bucket"
        ));
    }
}
