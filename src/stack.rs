//! Stack context assembled from a stack file.
//!
//! Loads and validates the configuration, materializes the desired resource
//! set and its dependency graph, and opens the configured state backend.
//! Commands receive one of these instead of wiring the pieces themselves.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::{ConfigParser, StackConfig, StackValidator, StateBackend};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::resource::ResourceSet;
use crate::state::{LocalStateStore, StateStore};

/// A fully loaded stack: validated configuration, desired resources and
/// their dependency graph.
#[derive(Debug)]
pub struct StackContext {
    /// Parsed stack configuration.
    pub config: StackConfig,
    /// Desired resources keyed by logical name.
    pub resources: ResourceSet,
    /// Dependency graph over the desired resources.
    pub graph: DependencyGraph,
}

impl StackContext {
    /// Loads a stack from a file, validating it and building the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, validation
    /// reports errors, a reference or dependency names an unknown resource,
    /// or the graph contains a cycle.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let parser = ConfigParser::new();
        parser.load_dotenv()?;
        let config = parser.load_file(path)?;
        Self::from_config(config)
    }

    /// Builds a stack context from an already parsed configuration.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`StackContext::load`], minus file I/O.
    pub fn from_config(config: StackConfig) -> Result<Self> {
        let validation = StackValidator::new().validate(&config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let resources = ResourceSet::from_configs(&config.resources)?;
        let graph = DependencyGraph::build(&resources)?;
        debug!(
            "Loaded stack {} with {} resources",
            config.stack.name,
            resources.len()
        );

        Ok(Self {
            config,
            resources,
            graph,
        })
    }

    /// The stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.stack.name
    }

    /// Opens the state backend named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub fn open_store(&self) -> Result<Box<dyn StateStore>> {
        match self.config.state.backend {
            StateBackend::Local => {
                let store = match &self.config.state.path {
                    Some(dir) => LocalStateStore::with_base_dir(dir, self.name()),
                    None => LocalStateStore::new(self.name())?,
                };
                Ok(Box::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
stack:
  name: demo
resources:
  - name: base
    type: test:core/Thing
    inputs:
      x: 1
  - name: child
    type: test:core/Thing
    inputs:
      parent: ${base.id}
";

    #[test]
    fn test_load_builds_resources_and_graph() {
        let config = ConfigParser::parse_yaml(SAMPLE, None).expect("parse");
        let ctx = StackContext::from_config(config).expect("context");
        assert_eq!(ctx.name(), "demo");
        assert_eq!(ctx.resources.len(), 2);
        assert_eq!(ctx.graph.apply_order(), ["base", "child"]);
    }

    #[test]
    fn test_validation_errors_stop_loading() {
        let yaml = "stack:\n  name: demo\nresources:\n  - name: bad name\n    type: t:m/R\n";
        let config = ConfigParser::parse_yaml(yaml, None).expect("parse");
        assert!(StackContext::from_config(config).is_err());
    }

    #[test]
    fn test_reference_to_unknown_resource_fails() {
        let yaml = "stack:\n  name: demo\nresources:\n  - name: a\n    type: t:m/R\n    inputs:\n      x: ${ghost.id}\n";
        let config = ConfigParser::parse_yaml(yaml, None).expect("parse");
        assert!(StackContext::from_config(config).is_err());
    }

    #[test]
    fn test_scaffold_stack_file_builds() {
        let template = include_str!("../templates/cairn.stack.yaml");
        let config = ConfigParser::parse_yaml(template, None).expect("parse");
        let ctx = StackContext::from_config(config).expect("context");

        // Multi-region topology: both functions feed the load balancer chain.
        assert!(ctx.resources.get("people-function-east").is_some());
        let order = ctx.graph.apply_order();
        let position = |name: &str| {
            order
                .iter()
                .position(|n| n == name)
                .unwrap_or_else(|| panic!("{name} missing from apply order"))
        };
        assert!(position("central-neg") < position("backend-service"));
        assert!(position("east-neg") < position("backend-service"));
        assert!(position("backend-service") < position("url-map"));
        assert!(position("url-map") < position("https-proxy"));
        assert!(position("https-proxy") < position("https-forwarding-rule"));
    }
}
