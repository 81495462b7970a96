//! Stack file parser.
//!
//! This module handles locating and loading the `cairn.stack.yaml` file and
//! the optional `.env` file next to it.

use crate::error::{CairnError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Candidate stack file names, checked in order.
const STACK_FILE_NAMES: &[&str] = &["cairn.stack.yaml", "cairn.stack.yml"];

/// Parser for stack configuration files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new stack file parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack file: {}", path.display());

        if !path.exists() {
            return Err(CairnError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CairnError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Self::parse_yaml(&content, Some(path))
    }

    /// Parses a stack configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing stack YAML");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            CairnError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack '{}' with {} resource(s)",
            config.stack.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads the `.env` file next to the stack file, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if a `.env` file exists but cannot be parsed.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_deref()
            .unwrap_or_else(|| Path::new("."))
            .join(".env");

        if env_path.exists() {
            debug!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CairnError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        }

        Ok(())
    }
}

/// Finds the stack file in the given directory.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if no candidate file exists.
pub fn find_config_file(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    for name in STACK_FILE_NAMES {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(CairnError::Config(ConfigError::FileNotFound {
        path: dir.join(STACK_FILE_NAMES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_file_roundtrip() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("cairn.stack.yaml");
        std::fs::write(
            &path,
            "stack:\n  name: demo\nresources:\n  - name: a\n    type: t:m/R\n",
        )
        .expect("write failed");

        let parser = ConfigParser::new().with_base_path(dir.path());
        let config = parser.load_file(&path).expect("load failed");
        assert_eq!(config.stack.name, "demo");

        let found = find_config_file(dir.path()).expect("find failed");
        assert_eq!(found, path);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().expect("tempdir failed");
        let parser = ConfigParser::new();
        let result = parser.load_file(dir.path().join("cairn.stack.yaml"));
        assert!(matches!(
            result,
            Err(CairnError::Config(ConfigError::FileNotFound { .. }))
        ));
        assert!(find_config_file(dir.path()).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = ConfigParser::parse_yaml("stack: [unclosed", None);
        assert!(matches!(
            result,
            Err(CairnError::Config(ConfigError::ParseError { .. }))
        ));
    }
}
