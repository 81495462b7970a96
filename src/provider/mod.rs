//! Provider plugin interface.
//!
//! The engine never embeds provider-specific logic; it orchestrates
//! create/update/delete calls through the [`Provider`] trait and selects the
//! implementation by the package segment of a resource's type token
//! (`gcp:firestore/Database` → `gcp`). This is capability dispatch, not
//! inheritance: a provider is a set of operations keyed by token.

mod memory;

pub use memory::{MemoryProvider, RecordedCall};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CairnError, ProviderError, Result};

/// Outputs of a successful create call.
#[derive(Debug, Clone)]
pub struct ProviderOutputs {
    /// Provider-assigned id of the external resource.
    pub id: String,
    /// Output attributes, available to dependents as `${name.attr}`.
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// Trait for resource providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates an external resource from resolved inputs.
    async fn create(
        &self,
        type_token: &str,
        inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ProviderOutputs>;

    /// Updates an existing external resource in place.
    async fn update(
        &self,
        type_token: &str,
        id: &str,
        inputs: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Map<String, serde_json::Value>>;

    /// Deletes an external resource.
    async fn delete(&self, type_token: &str, id: &str) -> Result<()>;

    /// Names input fields that are server-generated for this type and must
    /// be ignored when comparing desired inputs to recorded ones.
    fn ignored_fields(&self, _type_token: &str) -> Vec<String> {
        Vec::new()
    }

    /// Gets the provider name.
    fn name(&self) -> &'static str;
}

/// Registry of providers keyed by type-token package.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Providers by package name.
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for a type-token package.
    pub fn register(&mut self, package: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(package.into(), provider);
    }

    /// Resolves the provider for a type token.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownTypeToken`] if no provider is
    /// registered for the token's package.
    pub fn resolve(&self, type_token: &str) -> Result<Arc<dyn Provider>> {
        let package = package_of(type_token);
        self.providers.get(package).cloned().ok_or_else(|| {
            CairnError::Provider(ProviderError::UnknownTypeToken {
                type_token: type_token.to_string(),
            })
        })
    }

    /// Returns the server-generated fields to ignore when diffing this type.
    ///
    /// An unregistered package yields no ignore rules rather than an error,
    /// so planning stays possible without instantiating providers.
    #[must_use]
    pub fn ignored_fields(&self, type_token: &str) -> Vec<String> {
        self.providers
            .get(package_of(type_token))
            .map_or_else(Vec::new, |p| p.ignored_fields(type_token))
    }

    /// Returns true if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("packages", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Extracts the package segment of a type token.
fn package_of(type_token: &str) -> &str {
    type_token.split(':').next().unwrap_or(type_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_package() {
        let mut registry = ProviderRegistry::new();
        registry.register("test", Arc::new(MemoryProvider::new()));

        assert!(registry.resolve("test:core/Thing").is_ok());
        let err = registry
            .resolve("gcp:storage/Bucket")
            .map(|_| ())
            .expect_err("should fail");
        assert!(matches!(
            err,
            CairnError::Provider(ProviderError::UnknownTypeToken { .. })
        ));
    }

    #[test]
    fn test_ignored_fields_without_provider_is_empty() {
        let registry = ProviderRegistry::new();
        assert!(registry.ignored_fields("gcp:storage/Bucket").is_empty());
    }
}
