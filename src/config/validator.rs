//! Stack file validation.
//!
//! Structural checks that run before any graph construction or provider
//! work: name shape, duplicates, type token form, and explicit dependency
//! targets. Reference cycles and unknown reference targets are the graph
//! builder's job; this pass only catches what is visible in the flat file.

use crate::error::{CairnError, ConfigError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::StackConfig;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct StackValidator;

/// Validation result containing all findings.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Fatal validation errors.
    pub errors: Vec<ValidationError>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The resource (or `stack` for stack-level findings) at fault.
    pub resource: String,
    /// The error message.
    pub message: String,
}

impl StackValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the first finding if any fatal error is
    /// present; the full list is available in the returned result otherwise.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_stack_meta(config, &mut result);
        Self::validate_resources(config, &mut result);

        if result.errors.is_empty() {
            debug!("Stack validation passed ({} warning(s))", result.warnings.len());
            Ok(result)
        } else {
            let first = &result.errors[0];
            Err(CairnError::Config(ConfigError::ValidationError {
                message: first.message.clone(),
                resource: Some(first.resource.clone()),
            }))
        }
    }

    fn validate_stack_meta(config: &StackConfig, result: &mut ValidationResult) {
        if config.stack.name.is_empty() {
            result.errors.push(ValidationError {
                resource: String::from("stack"),
                message: String::from("Stack name cannot be empty"),
            });
        } else if !is_valid_name(&config.stack.name) {
            result.errors.push(ValidationError {
                resource: String::from("stack"),
                message: format!(
                    "Stack name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.stack.name
                ),
            });
        }

        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("Stack declares no resources"));
        }
    }

    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) {
        let mut seen: HashSet<&str> = HashSet::new();
        let declared: HashSet<&str> = config.resources.iter().map(|r| r.name.as_str()).collect();

        for resource in &config.resources {
            if resource.name.is_empty() {
                result.errors.push(ValidationError {
                    resource: String::from("<unnamed>"),
                    message: String::from("Resource name cannot be empty"),
                });
                continue;
            }

            if !is_valid_name(&resource.name) {
                result.errors.push(ValidationError {
                    resource: resource.name.clone(),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.name
                    ),
                });
            }

            if !seen.insert(&resource.name) {
                result.errors.push(ValidationError {
                    resource: resource.name.clone(),
                    message: format!("Duplicate resource name: {}", resource.name),
                });
            }

            if !is_valid_type_token(&resource.type_token) {
                result.errors.push(ValidationError {
                    resource: resource.name.clone(),
                    message: format!(
                        "Type token '{}' is invalid. Expected package:module/Type.",
                        resource.type_token
                    ),
                });
            }

            if !resource.inputs.is_object() {
                result.errors.push(ValidationError {
                    resource: resource.name.clone(),
                    message: String::from("Resource inputs must be a mapping"),
                });
            }

            for dependency in &resource.depends_on {
                if dependency == &resource.name {
                    result.errors.push(ValidationError {
                        resource: resource.name.clone(),
                        message: String::from("Resource cannot depend on itself"),
                    });
                } else if !declared.contains(dependency.as_str()) {
                    result.errors.push(ValidationError {
                        resource: resource.name.clone(),
                        message: format!("depends_on references undeclared resource '{dependency}'"),
                    });
                }
            }
        }
    }
}

/// Checks whether a stack or resource name is well formed.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Checks the `package:module/Type` shape of a type token.
fn is_valid_type_token(token: &str) -> bool {
    let Some((package, rest)) = token.split_once(':') else {
        return false;
    };
    let Some((module, type_name)) = rest.split_once('/') else {
        return false;
    };
    !package.is_empty() && !module.is_empty() && !type_name.is_empty()
}
