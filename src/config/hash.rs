//! Input hashing for change detection.
//!
//! Each state record carries a SHA-256 over the canonical unresolved input
//! encoding, so an unchanged resource can be recognized without a field walk.

use sha2::{Digest, Sha256};

use crate::resource::Resource;

/// Hasher for computing resource input hashes.
#[derive(Debug, Default)]
pub struct InputHasher;

impl InputHasher {
    /// Creates a new input hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a resource's identity and canonical inputs.
    ///
    /// The canonical encoding sorts map keys and renders deferred references
    /// as `${name.attr}` strings, so the hash is stable across runs.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.type_token.as_bytes());
        hasher.update(b"\0");
        hasher.update(resource.logical_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.hash_inputs(&resource.canonical_inputs()).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the hash of a canonical JSON input document.
    #[must_use]
    pub fn hash_inputs(&self, inputs: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        // serde_json maps serialize with sorted keys, so the encoding is
        // stable across runs.
        hasher.update(inputs.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceSet;
    use serde_json::json;

    fn single(inputs: serde_json::Value) -> Resource {
        let mut set = ResourceSet::new();
        set.declare("test:core/Thing", "thing", &inputs, vec![])
            .expect("declare failed");
        set.get("thing").expect("missing").clone()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = InputHasher::new();
        let a = single(json!({"x": 1, "y": "${other.name}"}));
        let b = single(json!({"y": "${other.name}", "x": 1}));
        assert_eq!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn test_hash_changes_with_inputs() {
        let hasher = InputHasher::new();
        let a = single(json!({"x": 1}));
        let b = single(json!({"x": 2}));
        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }
}
