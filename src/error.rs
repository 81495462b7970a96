//! Error types for the cairn composition engine.
//!
//! This module provides a comprehensive error hierarchy for all phases of a
//! run: stack configuration, graph construction, planning, provider calls,
//! execution, and state management.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the cairn composition engine.
#[derive(Debug, Error)]
pub enum CairnError {
    /// Stack configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider call errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stack configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Resource that failed validation.
        resource: Option<String>,
    },

    /// A logical name was declared twice in the same run.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated logical name.
        name: String,
    },

    /// A reference string could not be parsed.
    #[error("Invalid output reference '{reference}' in resource '{resource}'")]
    InvalidReference {
        /// The malformed reference expression.
        reference: String,
        /// Resource whose inputs contain it.
        resource: String,
    },
}

/// Dependency graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A resource references or depends on an undeclared resource.
    #[error("Resource '{resource}' depends on undeclared resource '{dependency}'")]
    UnknownDependency {
        /// The dependent resource.
        resource: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// The reference edges form a cycle, so outputs can never resolve.
    #[error("Dependency cycle detected: {cycle}")]
    Cycle {
        /// Human-readable description of the cycle members.
        cycle: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted and must not be treated as absent.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Writing to the state backend failed.
    #[error("State write failed: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider call errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No provider is registered for the type token's package.
    #[error("No provider registered for type token: {type_token}")]
    UnknownTypeToken {
        /// The unresolvable type token.
        type_token: String,
    },

    /// Transient failure; the call may be retried.
    #[error("Transient provider error: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
    },

    /// The provider is rate limiting requests.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The inputs were rejected by the provider; not retried.
    #[error("Provider validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The caller lacks permission; not retried.
    #[error("Provider permission error: {message}")]
    Permission {
        /// Description of the permission failure.
        message: String,
    },

    /// The external resource does not exist.
    #[error("Resource not found by provider: {id}")]
    NotFound {
        /// Provider-assigned id of the missing resource.
        id: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A reference had to be resolved before its source completed.
    #[error("Unresolved reference to '{reference}' while applying '{resource}'")]
    UnresolvedReference {
        /// The unresolved `resource.attribute` expression.
        reference: String,
        /// Resource whose inputs needed it.
        resource: String,
    },

    /// Maximum retry attempts exceeded for a transient failure.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
    },

    /// The run was aborted by the operator.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },

    /// One or more resources failed to apply.
    #[error("{failed} resource(s) failed to apply")]
    ApplyFailed {
        /// Number of failed resources.
        failed: usize,
    },
}

/// Result type alias for cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

impl CairnError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Transient { .. } | ProviderError::RateLimited { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::Transient { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific resource.
    #[must_use]
    pub fn validation(message: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Creates a validation error without a specific resource.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            resource: None,
        }
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write-failure error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error with the given message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a validation error with the given message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a permission error with the given message.
    #[must_use]
    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = CairnError::Provider(ProviderError::transient("socket reset"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(2));

        let err = CairnError::Provider(ProviderError::RateLimited {
            retry_after_secs: 30,
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(30));
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        let err = CairnError::Provider(ProviderError::validation("bad field"));
        assert!(!err.is_retryable());

        let err = CairnError::Provider(ProviderError::permission("missing role"));
        assert!(!err.is_retryable());

        let err = CairnError::Graph(GraphError::Cycle {
            cycle: String::from("a -> b -> a"),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }
}
