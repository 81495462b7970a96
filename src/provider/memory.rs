//! In-memory provider.
//!
//! Backs tests and local dry runs: resources live in a map, ids are UUIDs,
//! and outputs echo the resolved inputs plus the generated `id`. Fatal and
//! transient failures can be injected per type token to exercise the
//! executor's isolation and retry paths.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CairnError, ProviderError, Result};

use super::{Provider, ProviderOutputs};

/// One call issued against the provider, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Operation name: `create`, `update`, or `delete`.
    pub operation: String,
    /// Type token the call targeted.
    pub type_token: String,
}

/// In-memory provider implementation.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    /// Resolved inputs of live resources, keyed by id.
    resources: Mutex<HashMap<String, serde_json::Map<String, serde_json::Value>>>,
    /// Type tokens whose create/update calls fail with a validation error.
    fail_tokens: Mutex<HashSet<String>>,
    /// Remaining transient failures per type token.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// Server-generated fields per type token.
    server_fields: Mutex<HashMap<String, Vec<String>>>,
    /// Every call issued, in order.
    calls: Mutex<Vec<RecordedCall>>,
}

impl MemoryProvider {
    /// Creates an empty in-memory provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes create/update calls for a type token fail with a validation
    /// error.
    pub fn fail_on(&self, type_token: impl Into<String>) {
        self.lock_poison_safe(&self.fail_tokens).insert(type_token.into());
    }

    /// Makes the next `count` calls for a type token fail transiently.
    pub fn fail_transiently(&self, type_token: impl Into<String>, count: u32) {
        self.lock_poison_safe(&self.transient_failures)
            .insert(type_token.into(), count);
    }

    /// Declares server-generated fields for a type token.
    pub fn set_ignored_fields(&self, type_token: impl Into<String>, fields: Vec<String>) {
        self.lock_poison_safe(&self.server_fields)
            .insert(type_token.into(), fields);
    }

    /// Returns every call issued so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock_poison_safe(&self.calls).clone()
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.lock_poison_safe(&self.resources).len()
    }

    /// Returns true if a live resource with this id exists.
    #[must_use]
    pub fn has_resource(&self, id: &str) -> bool {
        self.lock_poison_safe(&self.resources).contains_key(id)
    }

    fn lock_poison_safe<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, operation: &str, type_token: &str) {
        self.lock_poison_safe(&self.calls).push(RecordedCall {
            operation: operation.to_string(),
            type_token: type_token.to_string(),
        });
    }

    fn check_failures(&self, type_token: &str) -> Result<()> {
        {
            let mut transient = self.lock_poison_safe(&self.transient_failures);
            if let Some(remaining) = transient.get_mut(type_token) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CairnError::Provider(ProviderError::transient(format!(
                        "injected transient failure for {type_token}"
                    ))));
                }
            }
        }

        if self.lock_poison_safe(&self.fail_tokens).contains(type_token) {
            return Err(CairnError::Provider(ProviderError::validation(format!(
                "injected validation failure for {type_token}"
            ))));
        }

        Ok(())
    }

    /// Builds the output set: resolved inputs echoed back plus the id.
    fn outputs_for(
        id: &str,
        inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut outputs = inputs.clone();
        outputs.insert(
            String::from("id"),
            serde_json::Value::String(id.to_string()),
        );
        outputs
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(
        &self,
        type_token: &str,
        inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ProviderOutputs> {
        self.record("create", type_token);
        self.check_failures(type_token)?;

        let id = Uuid::new_v4().to_string();
        self.lock_poison_safe(&self.resources)
            .insert(id.clone(), inputs.clone());

        let outputs = Self::outputs_for(&id, inputs);
        Ok(ProviderOutputs { id, outputs })
    }

    async fn update(
        &self,
        type_token: &str,
        id: &str,
        inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.record("update", type_token);
        self.check_failures(type_token)?;

        let mut resources = self.lock_poison_safe(&self.resources);
        let Some(stored) = resources.get_mut(id) else {
            return Err(CairnError::Provider(ProviderError::NotFound {
                id: id.to_string(),
            }));
        };
        *stored = inputs.clone();

        Ok(Self::outputs_for(id, inputs))
    }

    async fn delete(&self, type_token: &str, id: &str) -> Result<()> {
        self.record("delete", type_token);

        if self.lock_poison_safe(&self.resources).remove(id).is_none() {
            return Err(CairnError::Provider(ProviderError::NotFound {
                id: id.to_string(),
            }));
        }
        Ok(())
    }

    fn ignored_fields(&self, type_token: &str) -> Vec<String> {
        self.lock_poison_safe(&self.server_fields)
            .get(type_token)
            .cloned()
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_update_delete_lifecycle() {
        let provider = MemoryProvider::new();

        let created = provider
            .create("test:core/Thing", &inputs(json!({"x": 1})))
            .await
            .expect("create failed");
        assert!(provider.has_resource(&created.id));
        assert_eq!(created.outputs["x"], json!(1));
        assert_eq!(created.outputs["id"], json!(created.id.clone()));

        let updated = provider
            .update("test:core/Thing", &created.id, &inputs(json!({"x": 2})))
            .await
            .expect("update failed");
        assert_eq!(updated["x"], json!(2));

        provider
            .delete("test:core/Thing", &created.id)
            .await
            .expect("delete failed");
        assert!(!provider.has_resource(&created.id));
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_validation_failure() {
        let provider = MemoryProvider::new();
        provider.fail_on("test:core/Bad");

        let err = provider
            .create("test:core/Bad", &inputs(json!({})))
            .await
            .expect_err("should fail");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let provider = MemoryProvider::new();
        provider.fail_transiently("test:core/Flaky", 2);

        for _ in 0..2 {
            let err = provider
                .create("test:core/Flaky", &inputs(json!({})))
                .await
                .expect_err("should fail transiently");
            assert!(err.is_retryable());
        }

        provider
            .create("test:core/Flaky", &inputs(json!({})))
            .await
            .expect("third attempt should succeed");
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_resource() {
        let provider = MemoryProvider::new();
        let err = provider
            .delete("test:core/Thing", "no-such-id")
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            CairnError::Provider(ProviderError::NotFound { .. })
        ));
    }
}
